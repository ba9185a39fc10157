//! Trip ingestion and spatial binning.
//!
//! Raw trips are loaded into a staging table, H3 cells are computed in
//! Rust once per distinct pickup coordinate, and the staging rows are
//! joined back to their cells. The result holds one row per distinct
//! `(cell_id, boundary, pickup_at)`, so two pickups in the same cell at
//! the same instant count once.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use duckdb::Connection;
use h3o::{CellIndex, Resolution};
use taxi_map_database::sql::{identifier, path_literal};
use taxi_map_pipeline_models::progress::ProgressCallback;

use crate::TripError;
use crate::cell::{boundary_geojson, cell_at};
use crate::schema::{parquet_columns, trip_columns};

/// Coordinates appended per progress tick.
const BATCH_SIZE: usize = 50_000;

/// Counts collected while binning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Trips with a timestamp and both coordinates.
    pub raw_trips: u64,
    /// Distinct pickup coordinates.
    pub coordinates: u64,
    /// Coordinates with no valid cell (out of range or non-finite).
    pub skipped_coordinates: u64,
    /// Distinct cells.
    pub cells: u64,
    /// Rows in the binned table.
    pub rows: u64,
}

/// Creates `target` with columns `cell_id VARCHAR, boundary VARCHAR,
/// pickup_at TIMESTAMP` from the trip file at `input`.
///
/// # Errors
///
/// Returns [`TripError::NotFound`] if `input` does not exist,
/// [`TripError::MissingColumn`] if the file lacks the pickup columns, or
/// another [`TripError`] if a query fails.
#[allow(clippy::cast_possible_truncation)]
pub fn build_binned_trips(
    conn: &Connection,
    input: &Path,
    resolution: Resolution,
    target: &str,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IngestStats, TripError> {
    if !input.exists() {
        return Err(TripError::NotFound {
            path: input.display().to_string(),
        });
    }

    let columns = parquet_columns(conn, input)?;
    let cols = trip_columns(&columns, input)?;
    let ts = identifier(&cols.pickup_at);
    let lat = identifier(&cols.latitude);
    let lng = identifier(&cols.longitude);

    let raw = identifier(&format!("{target}__raw"));
    let coord_cells = format!("{target}__coord_cells");
    let boundaries = format!("{target}__boundaries");

    log::info!("Loading trips from {}...", input.display());
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {raw} AS
         SELECT
             CAST({ts} AS TIMESTAMP) AS pickup_at,
             CAST({lat} AS DOUBLE) AS lat,
             CAST({lng} AS DOUBLE) AS lng
         FROM read_parquet({path})
         WHERE {ts} IS NOT NULL AND {lat} IS NOT NULL AND {lng} IS NOT NULL;",
        path = path_literal(input),
    ))?;

    let mut stats = IngestStats::default();
    stats.raw_trips = count_rows(conn, &raw)?;

    let coords = distinct_coordinates(conn, &raw)?;
    stats.coordinates = coords.len() as u64;
    log::info!(
        "Binning {} distinct pickup coordinates from {} trips",
        stats.coordinates,
        stats.raw_trips
    );
    progress.set_total(stats.coordinates);

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} (lat DOUBLE NOT NULL, lng DOUBLE NOT NULL, cell_id VARCHAR NOT NULL);
         CREATE OR REPLACE TABLE {} (cell_id VARCHAR NOT NULL, boundary VARCHAR NOT NULL);",
        identifier(&coord_cells),
        identifier(&boundaries),
    ))?;

    let mut cells: BTreeSet<u64> = BTreeSet::new();
    {
        let mut appender = conn.appender(&coord_cells)?;
        for chunk in coords.chunks(BATCH_SIZE) {
            for &(lat, lng) in chunk {
                let Some(cell) = cell_at(lat, lng, resolution) else {
                    stats.skipped_coordinates += 1;
                    continue;
                };
                cells.insert(u64::from(cell));
                appender.append_row(duckdb::params![lat, lng, cell.to_string()])?;
            }
            progress.inc(chunk.len() as u64);
        }
        appender.flush()?;
    }

    if stats.skipped_coordinates > 0 {
        log::warn!(
            "Skipped {} pickup coordinates outside the valid lat/lng range",
            stats.skipped_coordinates
        );
    }

    {
        let mut appender = conn.appender(&boundaries)?;
        for raw_cell in &cells {
            let Ok(cell) = CellIndex::try_from(*raw_cell) else {
                continue;
            };
            appender.append_row(duckdb::params![cell.to_string(), boundary_geojson(cell)?])?;
        }
        appender.flush()?;
    }
    stats.cells = cells.len() as u64;

    let coord_cells = identifier(&coord_cells);
    let boundaries = identifier(&boundaries);
    conn.execute_batch(&format!(
        "CREATE TABLE {target} AS
         SELECT DISTINCT c.cell_id, b.boundary, r.pickup_at
         FROM {raw} r
         JOIN {coord_cells} c ON r.lat = c.lat AND r.lng = c.lng
         JOIN {boundaries} b ON b.cell_id = c.cell_id;
         DROP TABLE {raw};
         DROP TABLE {coord_cells};
         DROP TABLE {boundaries};",
        target = identifier(target),
    ))?;

    stats.rows = count_rows(conn, &identifier(target))?;
    progress.finish(format!("Binned {} trips into {} cells", stats.rows, stats.cells));
    log::info!(
        "Binned table {target}: {} rows across {} cells",
        stats.rows,
        stats.cells
    );

    Ok(stats)
}

fn distinct_coordinates(conn: &Connection, raw: &str) -> Result<Vec<(f64, f64)>, TripError> {
    let mut stmt = conn.prepare(&format!("SELECT DISTINCT lat, lng FROM {raw}"))?;
    let mut rows = stmt.query([])?;

    let mut coords = Vec::new();
    while let Some(row) = rows.next()? {
        coords.push((row.get(0)?, row.get(1)?));
    }
    Ok(coords)
}

/// `table` must already be quoted.
fn count_rows(conn: &Connection, table: &str) -> Result<u64, TripError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}
