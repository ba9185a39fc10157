//! Building to cell spatial join.
//!
//! Buildings are paged out of `DuckDB` by `rowid`, matched against the
//! [`CellTree`] in Rust, and the matching `(building, cell)` pairs are
//! appended to a staging table. A final SQL join attaches the building
//! geometry and the cell's counts. A building overlapping several cells
//! yields one row per cell.

use std::sync::Arc;

use duckdb::Connection;
use taxi_map_database::sql::identifier;
use taxi_map_pipeline_models::progress::ProgressCallback;

use crate::{CellTree, SpatialError, parse_geojson_to_multipolygon};

/// Buildings read per page.
const PAGE_SIZE: i64 = 10_000;

/// Counts collected while joining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Buildings scanned.
    pub buildings: u64,
    /// Buildings intersecting at least one cell.
    pub matched_buildings: u64,
    /// Rows in the joined table.
    pub pairs: u64,
    /// Buildings whose geometry did not parse.
    pub skipped: u64,
    /// Cell boundaries that did not parse and were left out of the tree.
    pub skipped_cells: u64,
}

/// Creates `target (geometry, cell_id, <count columns>)` by intersecting
/// `buildings (geometry)` with the boundaries of `temporal (cell_id,
/// boundary, <count columns>)`.
///
/// # Errors
///
/// Returns [`SpatialError`] if a query or append fails.
#[allow(clippy::cast_sign_loss)]
pub fn build_joined_table(
    conn: &Connection,
    buildings: &str,
    temporal: &str,
    target: &str,
    count_columns: &[String],
    progress: &Arc<dyn ProgressCallback>,
) -> Result<JoinStats, SpatialError> {
    let cells = CellTree::load(conn, temporal)?;

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", identifier(buildings)),
        [],
        |row| row.get(0),
    )?;
    log::info!(
        "Joining {total} buildings against {} cells...",
        cells.len()
    );
    progress.set_total(total as u64);

    let pairs = format!("{target}__pairs");
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} (building_rowid BIGINT NOT NULL, cell_id VARCHAR NOT NULL);",
        identifier(&pairs)
    ))?;

    let mut stats = JoinStats {
        skipped_cells: cells.skipped(),
        ..JoinStats::default()
    };
    {
        let mut page_stmt = conn.prepare(&format!(
            "SELECT rowid, geometry FROM {} WHERE rowid > ? ORDER BY rowid LIMIT {PAGE_SIZE}",
            identifier(buildings)
        ))?;
        let mut appender = conn.appender(&pairs)?;
        let mut last_rowid: i64 = -1;

        loop {
            let mut page: Vec<(i64, Option<String>)> = Vec::new();
            {
                let mut rows = page_stmt.query(duckdb::params![last_rowid])?;
                while let Some(row) = rows.next()? {
                    page.push((row.get(0)?, row.get(1)?));
                }
            }
            let Some(&(tail, _)) = page.last() else {
                break;
            };
            last_rowid = tail;

            for (rowid, geometry) in &page {
                stats.buildings += 1;
                let Some(shape) = geometry.as_deref().and_then(parse_geojson_to_multipolygon)
                else {
                    stats.skipped += 1;
                    continue;
                };

                let hits = cells.intersecting_cells(&shape);
                if !hits.is_empty() {
                    stats.matched_buildings += 1;
                }
                for cell_id in hits {
                    appender.append_row(duckdb::params![*rowid, cell_id])?;
                }
            }
            appender.flush()?;
            progress.inc(page.len() as u64);
        }
    }

    if stats.skipped > 0 {
        log::warn!(
            "Skipped {} buildings with unparseable geometry",
            stats.skipped
        );
    }

    let counts: String = count_columns
        .iter()
        .map(|c| format!(",\n             t.{}", identifier(c)))
        .collect();
    let pairs = identifier(&pairs);
    conn.execute_batch(&format!(
        "CREATE TABLE {target} AS
         SELECT
             b.geometry AS geometry,
             t.cell_id{counts}
         FROM {pairs} p
         JOIN {buildings} b ON b.rowid = p.building_rowid
         JOIN {temporal} t ON t.cell_id = p.cell_id
         ORDER BY p.building_rowid, p.cell_id;
         DROP TABLE {pairs};",
        target = identifier(target),
        buildings = identifier(buildings),
        temporal = identifier(temporal),
    ))?;

    let rows: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", identifier(target)),
        [],
        |row| row.get(0),
    )?;
    stats.pairs = rows as u64;

    progress.finish(format!(
        "Joined {} buildings into {} rows",
        stats.matched_buildings, stats.pairs
    ));
    log::info!(
        "Joined table {target}: {} rows from {} of {} buildings",
        stats.pairs,
        stats.matched_buildings,
        stats.buildings
    );

    Ok(stats)
}
