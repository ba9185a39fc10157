//! Trip file column detection.
//!
//! TLC files name the pickup timestamp `pickup_datetime` in the 2009-2010
//! schema and `tpep_pickup_datetime` afterwards. Only the older schema
//! carries pickup coordinates.

use std::path::Path;

use duckdb::Connection;
use taxi_map_database::sql::path_literal;

use crate::TripError;

/// Accepted pickup timestamp columns, in order of preference.
pub const TIMESTAMP_COLUMNS: &[&str] = &["tpep_pickup_datetime", "pickup_datetime"];

/// Pickup latitude column.
pub const LATITUDE_COLUMN: &str = "pickup_latitude";

/// Pickup longitude column.
pub const LONGITUDE_COLUMN: &str = "pickup_longitude";

/// Column names resolved for one trip file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripColumns {
    pub pickup_at: String,
    pub latitude: String,
    pub longitude: String,
}

/// Column names of a Parquet file.
///
/// # Errors
///
/// Returns [`TripError`] if the file cannot be read.
pub fn parquet_columns(conn: &Connection, path: &Path) -> Result<Vec<String>, TripError> {
    let mut stmt = conn.prepare(&format!(
        "DESCRIBE SELECT * FROM read_parquet({})",
        path_literal(path)
    ))?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(0)?);
    }
    Ok(columns)
}

/// Picks the pickup timestamp column.
///
/// # Errors
///
/// Returns [`TripError::MissingColumn`] if none of [`TIMESTAMP_COLUMNS`]
/// is present.
pub fn timestamp_column(columns: &[String], path: &Path) -> Result<String, TripError> {
    TIMESTAMP_COLUMNS
        .iter()
        .find(|candidate| columns.iter().any(|c| c == *candidate))
        .map(|c| (*c).to_string())
        .ok_or_else(|| TripError::MissingColumn {
            path: path.display().to_string(),
            expected: TIMESTAMP_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
        })
}

/// Resolves timestamp and coordinate columns.
///
/// # Errors
///
/// Returns [`TripError::MissingColumn`] if the timestamp or either
/// coordinate column is absent.
pub fn trip_columns(columns: &[String], path: &Path) -> Result<TripColumns, TripError> {
    let pickup_at = timestamp_column(columns, path)?;

    for required in [LATITUDE_COLUMN, LONGITUDE_COLUMN] {
        if !columns.iter().any(|c| c == required) {
            return Err(TripError::MissingColumn {
                path: path.display().to_string(),
                expected: vec![required.to_string()],
            });
        }
    }

    Ok(TripColumns {
        pickup_at,
        latitude: LATITUDE_COLUMN.to_string(),
        longitude: LONGITUDE_COLUMN.to_string(),
    })
}
