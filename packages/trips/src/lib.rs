#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Taxi trip processing.
//!
//! Reads TLC trip Parquet files through `DuckDB`, bins pickups into H3
//! cells with `h3o`, and aggregates them into per-cell, per-bucket counts.
//! Also produces the weekday-by-month trip report and downloads monthly
//! trip files.

pub mod aggregate;
pub mod cell;
pub mod download;
pub mod ingest;
pub mod report;
pub mod schema;

use taxi_map_database::StoreError;
use thiserror::Error;

/// Errors that can occur during trip processing.
#[derive(Debug, Error)]
pub enum TripError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Artifact store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Input file or directory does not exist or holds no trip files.
    #[error("Not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },

    /// The trip file lacks a required column.
    #[error("Missing column in {path}: expected one of {expected:?}")]
    MissingColumn {
        /// File that was inspected.
        path: String,
        /// Accepted column names.
        expected: Vec<String>,
    },

    /// H3 resolution outside 0..=15.
    #[error("Invalid H3 resolution: {0}")]
    Resolution(#[from] h3o::error::InvalidResolution),

    /// A GeoJSON boundary could not be encoded.
    #[error("GeoJSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// CSV writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Invalid argument.
    #[error("Invalid input: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

impl TripError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
