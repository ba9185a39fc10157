#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map generation for the joined building table.
//!
//! Reads joined `(geometry, cell_id, cnt_...)` rows from `DuckDB`, turns
//! them into a `GeoJSON` `FeatureCollection`, and writes a standalone
//! Kepler.gl HTML document with one layer per temporal bucket.

pub mod html;
pub mod kepler;

use std::path::Path;

use duckdb::Connection;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use taxi_map_database::sql::identifier;
use taxi_map_pipeline_models::{BucketScheme, MapCenter};
use thiserror::Error;

/// Errors that can occur while generating the map.
#[derive(Debug, Error)]
pub enum RenderError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error writing the document.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl RenderError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// One building-cell pair of the joined table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRow {
    /// Building footprint as `GeoJSON` text.
    pub geometry: String,
    pub cell_id: String,
    /// One count per bucket, in [`BucketScheme::buckets`] order.
    pub counts: Vec<u64>,
}

/// Reads every row of a joined table, ordered by cell then geometry so
/// the map document is identical across runs.
///
/// # Errors
///
/// Returns [`RenderError`] if the table lacks a count column of `scheme`
/// or the query fails.
pub fn read_joined(
    conn: &Connection,
    table: &str,
    scheme: BucketScheme,
) -> Result<Vec<JoinedRow>, RenderError> {
    let columns = scheme.column_names();
    let mut stmt = conn.prepare(&format!(
        "SELECT geometry, cell_id, {} FROM {} ORDER BY cell_id, geometry",
        columns.join(", "),
        identifier(table)
    ))?;
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut counts = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let count: i64 = row.get(i + 2)?;
            counts.push(u64::try_from(count).unwrap_or(0));
        }
        out.push(JoinedRow {
            geometry: row.get(0)?,
            cell_id: row.get(1)?,
            counts,
        });
    }
    Ok(out)
}

/// Builds the map dataset: one feature per row with `cell_id` and every
/// count column as properties. Rows whose geometry does not parse are
/// skipped with a warning.
#[must_use]
pub fn feature_collection(rows: &[JoinedRow], scheme: BucketScheme) -> FeatureCollection {
    let columns = scheme.column_names();
    let mut skipped = 0_u64;

    let features = rows
        .iter()
        .filter_map(|row| {
            let Ok(geometry) = row.geometry.parse::<Geometry>() else {
                skipped += 1;
                return None;
            };

            let mut properties = JsonObject::new();
            properties.insert("cell_id".to_string(), row.cell_id.clone().into());
            for (column, count) in columns.iter().zip(&row.counts) {
                properties.insert(column.clone(), (*count).into());
            }

            Some(Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    if skipped > 0 {
        log::warn!("Skipped {skipped} rows with unparseable geometry");
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes the Kepler.gl HTML map for `rows` to `path` and returns the
/// number of features it holds.
///
/// The document is written to a temporary sibling and renamed into place.
///
/// # Errors
///
/// Returns [`RenderError`] if serialization or the write fails.
pub fn write_map(
    path: &Path,
    rows: &[JoinedRow],
    scheme: BucketScheme,
    center: MapCenter,
    mapbox_token: Option<&str>,
) -> Result<usize, RenderError> {
    let dataset = feature_collection(rows, scheme);
    let config = kepler::build_config(scheme, center);
    let label = scheme.dataset_label();

    let document = html::render_html(label, label, &dataset, &config, mapbox_token)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RenderError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("html.tmp");
    std::fs::write(&tmp_path, document).map_err(|e| RenderError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| RenderError::io(path, e))?;

    log::info!(
        "Map with {} features written to {}",
        dataset.features.len(),
        path.display()
    );
    Ok(dataset.features.len())
}

#[cfg(test)]
mod tests {
    use taxi_map_pipeline_models::NYC_CENTER;

    use super::*;

    const SQUARE: &str =
        r#"{"type":"Polygon","coordinates":[[[-74.0,40.7],[-73.99,40.7],[-73.99,40.71],[-74.0,40.7]]]}"#;

    fn row(cell_id: &str, counts: Vec<u64>) -> JoinedRow {
        JoinedRow {
            geometry: SQUARE.to_string(),
            cell_id: cell_id.to_string(),
            counts,
        }
    }

    #[test]
    fn features_carry_every_count_column() {
        let rows = vec![row("8a2a1072b59ffff", vec![60, 0, 0, 0, 0, 0, 0])];
        let fc = feature_collection(&rows, BucketScheme::DayOfWeek);

        assert_eq!(fc.features.len(), 1);
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props["cell_id"], "8a2a1072b59ffff");
        assert_eq!(props["cnt_monday"], 60);
        assert_eq!(props["cnt_sunday"], 0);
        assert_eq!(props.len(), 8);
    }

    #[test]
    fn unparseable_geometry_is_skipped() {
        let mut bad = row("a", vec![1; 7]);
        bad.geometry = "POLYGON ((0 0, 1 0, 1 1, 0 0))".to_string();
        let fc = feature_collection(&[bad, row("b", vec![1; 7])], BucketScheme::DayOfWeek);
        assert_eq!(fc.features.len(), 1);
    }

    #[test]
    fn reads_joined_table() {
        let conn = Connection::open_in_memory().unwrap();
        let counts: Vec<String> = (0..24).map(|h| format!("{h} AS cnt_{h}")).collect();
        conn.execute_batch(&format!(
            "CREATE TABLE joined AS SELECT '{SQUARE}' AS geometry, 'c1' AS cell_id, {};",
            counts.join(", ")
        ))
        .unwrap();

        let rows = read_joined(&conn, "joined", BucketScheme::HourOfDay).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cell_id, "c1");
        assert_eq!(rows[0].counts[23], 23);
        assert!(read_joined(&conn, "joined", BucketScheme::DayOfWeek).is_err());
    }

    #[test]
    fn reads_rows_in_cell_order() {
        let conn = Connection::open_in_memory().unwrap();
        let counts: Vec<String> = (0..7)
            .map(|i| format!("0 AS {}", BucketScheme::DayOfWeek.column_names()[i]))
            .collect();
        conn.execute_batch(&format!(
            "CREATE TABLE joined AS
             SELECT * FROM (VALUES ('g2', 'c2'), ('g1', 'c2'), ('g3', 'c1')) t(geometry, cell_id),
                 (SELECT {});",
            counts.join(", ")
        ))
        .unwrap();

        let rows = read_joined(&conn, "joined", BucketScheme::DayOfWeek).unwrap();
        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.cell_id.as_str(), r.geometry.as_str()))
            .collect();
        assert_eq!(order, vec![("c1", "g3"), ("c2", "g1"), ("c2", "g2")]);
    }

    #[test]
    fn writes_map_document() {
        let dir = std::env::temp_dir().join(format!("taxi_map_generate_{}", std::process::id()));
        let path = dir.join("map.html");
        let rows = vec![row("a", vec![5, 0, 0, 0, 0, 0, 0])];

        let features =
            write_map(&path, &rows, BucketScheme::DayOfWeek, NYC_CENTER, None).unwrap();
        assert_eq!(features, 1);

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("buildings-layer-monday"));
        assert!(html.contains("\"cnt_monday\":5"));
        assert!(!dir.join("map.html.tmp").exists());
    }
}
