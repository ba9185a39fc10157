//! `DuckDB` extension bootstrap.
//!
//! Only the remote building fetch needs extensions: `spatial` to turn
//! native geometries into GeoJSON and `httpfs` to read from S3. Everything
//! else runs on the core engine plus the bundled Parquet reader.

use duckdb::Connection;

use crate::StoreError;
use crate::sql::string_literal;

/// A `DuckDB` extension the pipeline can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Extension {
    Spatial,
    Httpfs,
}

/// Installs (if needed) and loads each extension.
///
/// # Errors
///
/// Returns [`StoreError`] if an extension cannot be downloaded or loaded.
pub fn load(conn: &Connection, extensions: &[Extension]) -> Result<(), StoreError> {
    for ext in extensions {
        log::debug!("Loading DuckDB extension {ext}");
        conn.execute_batch(&format!("INSTALL {ext}; LOAD {ext};"))?;
    }
    Ok(())
}

/// Loads `spatial` and `httpfs` and points S3 access at `region`.
///
/// # Errors
///
/// Returns [`StoreError`] if an extension fails to load.
pub fn bootstrap_remote(conn: &Connection, region: &str) -> Result<(), StoreError> {
    log::info!("Installing extensions...");
    load(conn, &[Extension::Spatial, Extension::Httpfs])?;
    conn.execute_batch(&format!("SET s3_region = {};", string_literal(region)))?;
    Ok(())
}

/// Loads only `spatial`, for local sources stored as native geometry.
///
/// # Errors
///
/// Returns [`StoreError`] if the extension fails to load.
pub fn bootstrap_spatial(conn: &Connection) -> Result<(), StoreError> {
    load(conn, &[Extension::Spatial])
}
