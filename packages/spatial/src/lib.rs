#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over H3 cell boundaries.
//!
//! Loads cell polygons from an aggregate table, builds an R-tree over their
//! envelopes, and answers polygon-polygon intersection queries. The join
//! in [`join`] streams buildings through it and materializes one row per
//! intersecting (building, cell) pair.

pub mod join;

use duckdb::Connection;
use geo::{Intersects as _, MultiPolygon};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};
use taxi_map_database::sql::identifier;
use thiserror::Error;

/// Errors that can occur during the spatial join.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),
}

/// A cell boundary stored in the R-tree.
struct CellEntry {
    cell_id: String,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for CellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree of cell boundary polygons.
pub struct CellTree {
    tree: RTree<CellEntry>,
    skipped: u64,
}

impl CellTree {
    /// Loads `cell_id, boundary` from `table` and builds the index.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the query fails.
    pub fn load(conn: &Connection, table: &str) -> Result<Self, SpatialError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT cell_id, boundary FROM {} WHERE boundary IS NOT NULL",
            identifier(table)
        ))?;
        let mut rows = stmt.query([])?;

        let mut boundaries = Vec::new();
        while let Some(row) = rows.next()? {
            boundaries.push((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }

        let tree = Self::from_boundaries(boundaries);
        log::info!("Loaded {} cells into spatial index", tree.len());
        Ok(tree)
    }

    /// Builds the index from `(cell_id, GeoJSON boundary)` pairs.
    /// Boundaries that fail to parse are skipped with a warning.
    pub fn from_boundaries<I>(boundaries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = Vec::new();
        let mut skipped = 0;

        for (cell_id, geojson_str) in boundaries {
            let Some(polygon) = parse_geojson_to_multipolygon(&geojson_str) else {
                log::warn!("Failed to parse GeoJSON boundary for cell {cell_id}");
                skipped += 1;
                continue;
            };
            let Some(envelope) = compute_envelope(&polygon) else {
                skipped += 1;
                continue;
            };
            entries.push(CellEntry {
                cell_id,
                envelope,
                polygon,
            });
        }

        Self {
            tree: RTree::bulk_load(entries),
            skipped,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Boundaries dropped because they did not parse.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Ids of every cell whose boundary intersects `shape`, sorted.
    ///
    /// Envelope hits from the R-tree are confirmed with an exact
    /// intersection test. Touching boundaries count as intersecting.
    #[must_use]
    pub fn intersecting_cells(&self, shape: &MultiPolygon<f64>) -> Vec<&str> {
        let Some(query_env) = compute_envelope(shape) else {
            return Vec::new();
        };

        let mut cells: Vec<&str> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(shape))
            .map(|entry| entry.cell_id.as_str())
            .collect();
        cells.sort_unstable();
        cells
    }
}

/// Parse a `GeoJSON` geometry string into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon`; anything else is `None`.
#[must_use]
pub fn parse_geojson_to_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    if let GeoJson::Geometry(geom) = geojson {
        let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
        match geo_geom {
            geo::Geometry::MultiPolygon(mp) => Some(mp),
            geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
            _ => None,
        }
    } else {
        None
    }
}

/// Bounding box envelope of a [`MultiPolygon`], `None` if it is empty.
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    use geo::BoundingRect;

    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
pub(crate) mod test_shapes {
    /// Axis-aligned square as a GeoJSON polygon.
    pub fn square(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> String {
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{xmin},{ymin}],[{xmax},{ymin}],[{xmax},{ymax}],[{xmin},{ymax}],[{xmin},{ymin}]]]}}"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_shapes::square;
    use super::*;

    fn two_cells() -> CellTree {
        CellTree::from_boundaries(vec![
            ("a".to_string(), square(0.0, 0.0, 1.0, 1.0)),
            ("b".to_string(), square(1.0, 0.0, 2.0, 1.0)),
        ])
    }

    #[test]
    fn parses_polygon_and_multipolygon() {
        assert!(parse_geojson_to_multipolygon(&square(0.0, 0.0, 1.0, 1.0)).is_some());

        let multi = r#"{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,0]]],[[[2,2],[3,2],[3,3],[2,2]]]]}"#;
        assert_eq!(parse_geojson_to_multipolygon(multi).unwrap().0.len(), 2);

        assert!(parse_geojson_to_multipolygon(r#"{"type":"Point","coordinates":[0,0]}"#).is_none());
        assert!(parse_geojson_to_multipolygon("POLYGON ((0 0, 1 0, 1 1, 0 0))").is_none());
    }

    #[test]
    fn straddling_shape_hits_both_cells() {
        let tree = two_cells();
        let shape = parse_geojson_to_multipolygon(&square(0.9, 0.4, 1.1, 0.6)).unwrap();
        assert_eq!(tree.intersecting_cells(&shape), vec!["a", "b"]);
    }

    #[test]
    fn envelope_hit_without_overlap_is_rejected() {
        let tree = CellTree::from_boundaries(vec![(
            "tri".to_string(),
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[0,1],[0,0]]]}"#.to_string(),
        )]);
        // Inside the triangle's envelope but past its hypotenuse.
        let shape = parse_geojson_to_multipolygon(&square(0.8, 0.8, 0.9, 0.9)).unwrap();
        assert!(tree.intersecting_cells(&shape).is_empty());
    }

    #[test]
    fn unparseable_boundaries_are_skipped() {
        let tree = CellTree::from_boundaries(vec![
            ("a".to_string(), square(0.0, 0.0, 1.0, 1.0)),
            ("bad".to_string(), "not json".to_string()),
        ]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.skipped(), 1);
    }
}
