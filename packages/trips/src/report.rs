//! Weekday-by-month trip counts over a directory of trip files.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use duckdb::Connection;
use strum::IntoEnumIterator as _;
use taxi_map_database::sql::{identifier, path_literal};
use taxi_map_pipeline_models::Weekday;

use crate::TripError;
use crate::schema::{parquet_columns, timestamp_column};

/// Trip counts keyed by weekday and calendar month, summed over files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyReport {
    months: BTreeSet<u32>,
    counts: BTreeMap<(Weekday, u32), u64>,
}

impl DailyReport {
    /// Months (1-12) seen in any file, ascending.
    #[must_use]
    pub fn months(&self) -> Vec<u32> {
        self.months.iter().copied().collect()
    }

    /// Trips on `day` in `month`; 0 if none were seen.
    #[must_use]
    pub fn count(&self, day: Weekday, month: u32) -> u64 {
        self.counts.get(&(day, month)).copied().unwrap_or(0)
    }

    /// Trips across every weekday and month.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    fn add(&mut self, day: Weekday, month: u32, trips: u64) {
        self.months.insert(month);
        *self.counts.entry((day, month)).or_default() += trips;
    }

    /// Writes one row per weekday (Monday first) and one `Month <m>`
    /// column per month.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::Csv`] if writing fails.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), TripError> {
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec!["day_of_week".to_string()];
        header.extend(self.months.iter().map(|m| format!("Month {m}")));
        writer.write_record(&header)?;

        for day in Weekday::iter() {
            let mut record = vec![day.to_string()];
            record.extend(
                self.months
                    .iter()
                    .map(|&m| self.count(day, m).to_string()),
            );
            writer.write_record(&record)?;
        }

        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Parquet files directly inside `dir`, sorted by name.
///
/// # Errors
///
/// Returns [`TripError::NotFound`] if `dir` is missing or holds no
/// `*.parquet` files.
pub fn trip_files(dir: &Path) -> Result<Vec<PathBuf>, TripError> {
    if !dir.is_dir() {
        return Err(TripError::NotFound {
            path: dir.display().to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| TripError::io(dir, e))? {
        let path = entry.map_err(|e| TripError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(TripError::NotFound {
            path: format!("{}/*.parquet", dir.display()),
        });
    }

    files.sort();
    Ok(files)
}

/// Counts trips per weekday and month across every trip file in `dir`.
///
/// # Errors
///
/// Returns [`TripError::NotFound`] if there are no trip files,
/// [`TripError::MissingColumn`] if a file has no pickup timestamp, or
/// another [`TripError`] if a query fails.
pub fn daily_counts(conn: &Connection, dir: &Path) -> Result<DailyReport, TripError> {
    let mut report = DailyReport::default();

    for path in trip_files(dir)? {
        log::info!("Processing {}...", path.display());
        let columns = parquet_columns(conn, &path)?;
        let ts = identifier(&timestamp_column(&columns, &path)?);

        let mut stmt = conn.prepare(&format!(
            "SELECT
                 CAST(EXTRACT(MONTH FROM CAST({ts} AS TIMESTAMP)) AS INTEGER) AS month,
                 CAST(EXTRACT(ISODOW FROM CAST({ts} AS TIMESTAMP)) AS INTEGER) AS isodow,
                 COUNT(*) AS trips
             FROM read_parquet({})
             WHERE {ts} IS NOT NULL
             GROUP BY 1, 2",
            path_literal(&path)
        ))?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let month: i32 = row.get(0)?;
            let isodow: i32 = row.get(1)?;
            let trips: i64 = row.get(2)?;

            let (Ok(month), Some(day)) = (
                u32::try_from(month),
                u32::try_from(isodow).ok().and_then(Weekday::from_iso),
            ) else {
                continue;
            };
            report.add(day, month, u64::try_from(trips).unwrap_or(0));
        }
    }

    log::info!(
        "Counted {} trips over {} months",
        report.total(),
        report.months.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taxi_map_report_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_trips(conn: &Connection, path: &Path, column: &str, timestamps: &[&str]) {
        let values: Vec<String> = timestamps
            .iter()
            .map(|ts| format!("(TIMESTAMP '{ts}')"))
            .collect();
        conn.execute_batch(&format!(
            "COPY (SELECT * FROM (VALUES {}) t({column})) TO {} (FORMAT parquet);",
            values.join(", "),
            path_literal(path)
        ))
        .unwrap();
    }

    #[test]
    fn missing_directory_is_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        let err = daily_counts(&conn, Path::new("/nonexistent/trips")).unwrap_err();
        assert!(matches!(err, TripError::NotFound { .. }));
    }

    #[test]
    fn directory_without_parquet_is_not_found() {
        let dir = temp_dir("empty");
        std::fs::write(dir.join("notes.txt"), "hello").unwrap();
        assert!(matches!(
            trip_files(&dir).unwrap_err(),
            TripError::NotFound { .. }
        ));
    }

    #[test]
    fn sums_counts_across_files_and_schemas() {
        let dir = temp_dir("sum");
        let conn = Connection::open_in_memory().unwrap();
        // 2010-05-03 is a Monday, 2010-05-09 a Sunday, 2024-06-03 a Monday.
        write_trips(
            &conn,
            &dir.join("legacy.parquet"),
            "pickup_datetime",
            &["2010-05-03 08:00:00", "2010-05-03 09:00:00", "2010-05-09 10:00:00"],
        );
        write_trips(
            &conn,
            &dir.join("modern.parquet"),
            "tpep_pickup_datetime",
            &["2010-05-03 11:00:00", "2024-06-03 12:00:00"],
        );

        let report = daily_counts(&conn, &dir).unwrap();

        assert_eq!(report.months(), vec![5, 6]);
        assert_eq!(report.count(Weekday::Monday, 5), 3);
        assert_eq!(report.count(Weekday::Sunday, 5), 1);
        assert_eq!(report.count(Weekday::Monday, 6), 1);
        assert_eq!(report.count(Weekday::Tuesday, 5), 0);
        assert_eq!(report.total(), 5);
    }

    #[test]
    fn csv_has_weekday_rows_and_month_columns() {
        let mut report = DailyReport::default();
        report.add(Weekday::Monday, 5, 10);
        report.add(Weekday::Sunday, 6, 2);

        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "day_of_week,Month 5,Month 6");
        assert_eq!(lines[1], "Monday,10,0");
        assert_eq!(lines[7], "Sunday,0,2");
        assert_eq!(lines.len(), 8);
    }
}
