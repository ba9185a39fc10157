//! Temporal aggregation.
//!
//! Counts binned trips per `(cell, boundary, bucket)`, drops groups below
//! the minimum count, and pivots the survivors into one `cnt_<bucket>`
//! column per bucket of the scheme. A cell appears iff at least one of its
//! buckets clears the threshold; its other buckets read 0.

use duckdb::Connection;
use taxi_map_database::sql::identifier;
use taxi_map_pipeline_models::BucketScheme;

use crate::TripError;

/// Builds the `CREATE TABLE` statement for the aggregate of `source`.
#[must_use]
pub fn aggregate_sql(source: &str, target: &str, scheme: BucketScheme, min_count: u32) -> String {
    let pivot: Vec<String> = scheme
        .buckets()
        .iter()
        .map(|bucket| {
            format!(
                "MAX(CASE WHEN bucket = {} THEN trip_count ELSE 0 END) AS {}",
                bucket.sql_value,
                bucket.column()
            )
        })
        .collect();

    format!(
        "CREATE TABLE {target} AS
         SELECT
             cell_id,
             boundary,
             {pivot}
         FROM (
             SELECT
                 cell_id,
                 boundary,
                 {bucket} AS bucket,
                 COUNT(*) AS trip_count
             FROM {source}
             GROUP BY 1, 2, 3
             HAVING COUNT(*) >= {min_count}
         )
         GROUP BY 1, 2
         ORDER BY cell_id",
        target = identifier(target),
        source = identifier(source),
        pivot = pivot.join(",\n             "),
        bucket = scheme.bucket_sql("pickup_at"),
    )
}

/// Creates the aggregate table `target` from the binned table `source`.
/// Returns the number of cells that survived the threshold.
///
/// # Errors
///
/// Returns [`TripError`] if the query fails.
pub fn build_temporal_table(
    conn: &Connection,
    source: &str,
    target: &str,
    scheme: BucketScheme,
    min_count: u32,
) -> Result<u64, TripError> {
    log::info!(
        "Aggregating {source} by {scheme} (min {min_count} trips per bucket) into {target}..."
    );
    conn.execute_batch(&aggregate_sql(source, target, scheme, min_count))?;

    let cells: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", identifier(target)),
        [],
        |row| row.get(0),
    )?;
    log::info!("{target}: {cells} cells with at least one qualifying bucket");

    #[allow(clippy::cast_sign_loss)]
    Ok(cells as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct CellCounts {
        cell_id: String,
        counts: Vec<u64>,
    }

    impl CellCounts {
        fn total(&self) -> u64 {
            self.counts.iter().sum()
        }
    }

    fn read_aggregates(conn: &Connection, table: &str, scheme: BucketScheme) -> Vec<CellCounts> {
        let columns = scheme.column_names();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT cell_id, {} FROM {} ORDER BY cell_id",
                columns.join(", "),
                identifier(table)
            ))
            .unwrap();
        let rows: Vec<CellCounts> = stmt
            .query_map([], |row| {
                let mut counts = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let count: i64 = row.get(i + 1)?;
                    counts.push(u64::try_from(count).unwrap());
                }
                Ok(CellCounts {
                    cell_id: row.get(0)?,
                    counts,
                })
            })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        rows
    }

    /// Inserts `n` trips for `cell` starting at `start`, one minute apart.
    fn insert_trips(conn: &Connection, cell: &str, start: &str, n: u32) {
        conn.execute_batch(&format!(
            "INSERT INTO binned
             SELECT '{cell}', '{{}}', TIMESTAMP '{start}' + INTERVAL (i) MINUTE
             FROM range({n}) t(i);"
        ))
        .unwrap();
    }

    fn binned() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE binned (cell_id VARCHAR, boundary VARCHAR, pickup_at TIMESTAMP);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn bucket_below_threshold_reads_zero() {
        let conn = binned();
        // 2024-01-01 is a Monday, 2024-01-02 a Tuesday.
        insert_trips(&conn, "a", "2024-01-01 08:00:00", 25);
        insert_trips(&conn, "a", "2024-01-02 08:00:00", 19);

        build_temporal_table(&conn, "binned", "temporal", BucketScheme::DayOfWeek, 20).unwrap();
        let rows = read_aggregates(&conn, "temporal", BucketScheme::DayOfWeek);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counts, vec![25, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn cell_without_qualifying_bucket_is_absent() {
        let conn = binned();
        insert_trips(&conn, "a", "2024-01-01 08:00:00", 5);
        insert_trips(&conn, "b", "2024-01-01 08:00:00", 4);
        insert_trips(&conn, "b", "2024-01-03 08:00:00", 4);

        let cells =
            build_temporal_table(&conn, "binned", "temporal", BucketScheme::DayOfWeek, 5).unwrap();
        let rows = read_aggregates(&conn, "temporal", BucketScheme::DayOfWeek);

        assert_eq!(cells, 1);
        assert_eq!(rows[0].cell_id, "a");
    }

    #[test]
    fn sunday_lands_in_last_column() {
        let conn = binned();
        insert_trips(&conn, "a", "2024-01-07 12:00:00", 3);

        build_temporal_table(&conn, "binned", "temporal", BucketScheme::DayOfWeek, 1).unwrap();
        let rows = read_aggregates(&conn, "temporal", BucketScheme::DayOfWeek);

        assert_eq!(rows[0].counts[6], 3);
        assert_eq!(rows[0].total(), 3);
    }

    #[test]
    fn hour_pivot_has_every_hour() {
        let conn = binned();
        // 90 one-minute-apart trips from 08:00 span hours 8 (60) and 9 (30).
        insert_trips(&conn, "a", "2024-01-01 08:00:00", 90);

        build_temporal_table(&conn, "binned", "temporal", BucketScheme::HourOfDay, 20).unwrap();
        let rows = read_aggregates(&conn, "temporal", BucketScheme::HourOfDay);

        assert_eq!(rows[0].counts.len(), 24);
        assert_eq!(rows[0].counts[8], 60);
        assert_eq!(rows[0].counts[9], 30);
        assert_eq!(rows[0].total(), 90);
    }

    #[test]
    fn rows_are_ordered_by_cell() {
        let conn = binned();
        insert_trips(&conn, "c", "2024-01-01 08:00:00", 2);
        insert_trips(&conn, "a", "2024-01-01 08:00:00", 2);
        insert_trips(&conn, "b", "2024-01-01 08:00:00", 2);

        build_temporal_table(&conn, "binned", "temporal", BucketScheme::DayOfWeek, 1).unwrap();
        let ids: Vec<String> = read_aggregates(&conn, "temporal", BucketScheme::DayOfWeek)
            .into_iter()
            .map(|r| r.cell_id)
            .collect();

        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
