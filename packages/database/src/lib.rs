#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` storage for the taxi map pipeline.
//!
//! Every pipeline stage persists its result as a named artifact: a table in
//! `data/taxi_map.duckdb` or a Parquet file under `data/cache/`. The
//! [`store::ArtifactStore`] builds an artifact only when no artifact with
//! that name exists. Names come from [`key::ArtifactKey::derive`], which
//! hashes the parameters that produced the artifact, so changing a
//! parameter selects a fresh artifact instead of a stale one.

pub mod extensions;
pub mod key;
pub mod paths;
pub mod sql;
pub mod store;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Filesystem error on a cached file or directory.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Cache key parameters could not be encoded.
    #[error("Key encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Artifact name is not a plain SQL identifier.
    #[error("Invalid artifact name: {name}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A construction procedure returned without creating its artifact.
    #[error("Construction of {name} did not create the artifact")]
    NotCreated {
        /// Artifact name.
        name: String,
    },
}

impl StoreError {
    /// Wraps an I/O error with the path it occurred at.
    #[must_use]
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
