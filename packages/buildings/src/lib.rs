#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Building footprint ingestion.
//!
//! Footprints are read from an Overture Maps style Parquet source (a
//! `geometry` column plus a `bbox` struct with `xmin`/`xmax`/`ymin`/`ymax`),
//! filtered to a bounding box, and stored with GeoJSON text geometry. The
//! fetch writes a Parquet file so later runs can skip the remote read; the
//! table is loaded from that file.

use std::path::Path;

use duckdb::Connection;
use taxi_map_database::StoreError;
use taxi_map_database::extensions;
use taxi_map_database::sql::{identifier, path_literal, string_literal};
use taxi_map_pipeline_models::{BoundingBox, BuildingGeometry, BuildingsConfig};
use thiserror::Error;

/// Errors that can occur during building ingestion.
#[derive(Debug, Error)]
pub enum BuildingError {
    /// `DuckDB` query error, including remote read failures.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Artifact store or extension error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local building source does not exist.
    #[error("Not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },
}

/// Builds the `COPY` statement that writes footprints from `config.uri`
/// intersecting `bbox` to `dest`.
#[must_use]
pub fn fetch_sql(config: &BuildingsConfig, bbox: &BoundingBox, dest: &Path) -> String {
    let (geometry, options) = match config.geometry {
        BuildingGeometry::Native => (
            "CAST(ST_AsGeoJSON(geometry) AS VARCHAR)",
            ", filename=true, hive_partitioning=1",
        ),
        BuildingGeometry::Geojson => ("CAST(geometry AS VARCHAR)", ""),
    };

    format!(
        "COPY (
             SELECT {geometry} AS geometry
             FROM read_parquet({uri}{options})
             WHERE
                 bbox.xmin <= {xmax}
                 AND bbox.xmax >= {xmin}
                 AND bbox.ymin <= {ymax}
                 AND bbox.ymax >= {ymin}
         ) TO {dest} (FORMAT parquet);",
        uri = string_literal(&config.uri),
        xmin = bbox.xmin,
        ymin = bbox.ymin,
        xmax = bbox.xmax,
        ymax = bbox.ymax,
        dest = path_literal(dest),
    )
}

/// Writes footprints intersecting `bbox` to a Parquet file at `dest`.
///
/// Loads `spatial` and `httpfs` for a remote source and `spatial` alone for
/// a local native-geometry source. A local GeoJSON source needs no
/// extensions.
///
/// # Errors
///
/// Returns [`BuildingError::NotFound`] for a missing local source, or
/// another [`BuildingError`] if an extension or the read fails. Remote
/// reads are not retried.
pub fn fetch_to_parquet(
    conn: &Connection,
    config: &BuildingsConfig,
    bbox: &BoundingBox,
    dest: &Path,
) -> Result<(), BuildingError> {
    if config.is_remote() {
        extensions::bootstrap_remote(conn, &config.s3_region)?;
        log::info!("Downloading buildings data from {}...", config.uri);
    } else {
        check_local_source(&config.uri)?;
        if config.geometry == BuildingGeometry::Native {
            extensions::bootstrap_spatial(conn)?;
        }
        log::info!("Reading buildings from {}...", config.uri);
    }

    conn.execute_batch(&fetch_sql(config, bbox, dest))?;
    Ok(())
}

/// A plain local path must exist. Globs are left to `read_parquet`.
fn check_local_source(uri: &str) -> Result<(), BuildingError> {
    if uri.contains(['*', '?', '[']) || Path::new(uri).exists() {
        return Ok(());
    }
    Err(BuildingError::NotFound {
        path: uri.to_string(),
    })
}

/// Creates `target (geometry VARCHAR)` from a fetched footprint file and
/// returns its row count. Rows with a null geometry are dropped.
///
/// # Errors
///
/// Returns [`BuildingError`] if the file cannot be read.
pub fn load_buildings_table(
    conn: &Connection,
    source: &Path,
    target: &str,
) -> Result<u64, BuildingError> {
    conn.execute_batch(&format!(
        "CREATE TABLE {target} AS
         SELECT CAST(geometry AS VARCHAR) AS geometry
         FROM read_parquet({source})
         WHERE geometry IS NOT NULL;",
        target = identifier(target),
        source = path_literal(source),
    ))?;

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", identifier(target)),
        [],
        |row| row.get(0),
    )?;
    log::info!("Loaded {count} buildings into {target}");

    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use taxi_map_pipeline_models::NYC_BBOX;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taxi_map_buildings_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn square(xmin: f64, ymin: f64, size: f64) -> String {
        let (xmax, ymax) = (xmin + size, ymin + size);
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{xmin},{ymin}],[{xmax},{ymin}],[{xmax},{ymax}],[{xmin},{ymax}],[{xmin},{ymin}]]]}}"#
        )
    }

    /// Writes a GeoJSON footprint source with a `bbox` struct per row.
    fn write_source(conn: &Connection, path: &Path, squares: &[(f64, f64, f64)]) {
        let rows: Vec<String> = squares
            .iter()
            .map(|&(x, y, s)| {
                format!(
                    "({}, {{'xmin': {x}, 'xmax': {}, 'ymin': {y}, 'ymax': {}}})",
                    string_literal(&square(x, y, s)),
                    x + s,
                    y + s
                )
            })
            .collect();
        conn.execute_batch(&format!(
            "COPY (SELECT * FROM (VALUES {}) t(geometry, bbox)) TO {} (FORMAT parquet);",
            rows.join(", "),
            path_literal(path)
        ))
        .unwrap();
    }

    fn local_config(path: &Path) -> BuildingsConfig {
        BuildingsConfig {
            uri: path.display().to_string(),
            geometry: BuildingGeometry::Geojson,
            ..BuildingsConfig::default()
        }
    }

    #[test]
    fn remote_sql_converts_geometry_and_filters_bbox() {
        let sql = fetch_sql(
            &BuildingsConfig::default(),
            &NYC_BBOX,
            Path::new("out.parquet"),
        );
        assert!(sql.contains("CAST(ST_AsGeoJSON(geometry) AS VARCHAR)"));
        assert!(sql.contains("hive_partitioning=1"));
        assert!(sql.contains("bbox.xmin <= -73.72905"));
        assert!(sql.contains("bbox.ymax >= 40.488386"));
    }

    #[test]
    fn only_buildings_touching_bbox_are_kept() {
        let dir = temp_dir("filter");
        let source = dir.join("source.parquet");
        let fetched = dir.join("fetched.parquet");
        let conn = Connection::open_in_memory().unwrap();
        write_source(
            &conn,
            &source,
            &[
                // Midtown
                (-73.99, 40.75, 0.001),
                // Straddles the western edge
                (-74.2755, 40.6, 0.001),
                // Boston
                (-71.06, 42.36, 0.001),
            ],
        );

        fetch_to_parquet(&conn, &local_config(&source), &NYC_BBOX, &fetched).unwrap();
        let rows = load_buildings_table(&conn, &fetched, "buildings").unwrap();
        assert_eq!(rows, 2);

        let boston: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM buildings WHERE geometry LIKE '%-71.06%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(boston, 0);
    }

    #[test]
    fn missing_local_source_is_not_found() {
        let dir = temp_dir("missing");
        let conn = Connection::open_in_memory().unwrap();
        let err = fetch_to_parquet(
            &conn,
            &local_config(&dir.join("nope.parquet")),
            &NYC_BBOX,
            &dir.join("out.parquet"),
        )
        .unwrap_err();
        assert!(matches!(err, BuildingError::NotFound { .. }));
    }
}
