#![allow(clippy::module_name_repetitions)]
//! Canonical file paths inside a data directory.

use std::path::{Path, PathBuf};

/// Returns the artifact database path.
#[must_use]
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("taxi_map.duckdb")
}

/// Returns the directory for cached Parquet artifacts.
#[must_use]
pub fn cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("cache")
}

/// Returns the directory for maps and exported results.
#[must_use]
pub fn generated_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("generated")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
