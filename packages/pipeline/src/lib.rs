#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end taxi map pipeline.
//!
//! Runs trips -> aggregate -> buildings -> join -> export -> map against an
//! [`ArtifactStore`]. Every stage is an artifact; a stage whose artifact
//! already exists is skipped. The run is linear and not resumable: the
//! first failing stage aborts it with that stage's error.
//!
//! Everything here blocks. Async callers should run [`run`] inside
//! `spawn_blocking`.

pub mod keys;

use std::path::PathBuf;
use std::sync::Arc;

use taxi_map_buildings::{BuildingError, fetch_to_parquet, load_buildings_table};
use taxi_map_database::StoreError;
use taxi_map_database::paths::generated_dir;
use taxi_map_database::store::{ArtifactOutcome, ArtifactStore};
use taxi_map_generate::{RenderError, read_joined, write_map};
use taxi_map_pipeline_models::progress::ProgressCallback;
use taxi_map_pipeline_models::{ConfigError, NYC_CENTER, PipelineConfig};
use taxi_map_spatial::SpatialError;
use taxi_map_spatial::join::{JoinStats, build_joined_table};
use taxi_map_trips::TripError;
use taxi_map_trips::aggregate::build_temporal_table;
use taxi_map_trips::cell::resolution;
use taxi_map_trips::ingest::{IngestStats, build_binned_trips};
use thiserror::Error;

pub use keys::ArtifactKeys;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Trips(#[from] TripError),

    #[error(transparent)]
    Buildings(#[from] BuildingError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// The trip input file does not exist.
    #[error("Not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },
}

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Stage {
    #[strum(to_string = "Binning trips")]
    Trips,
    #[strum(to_string = "Aggregating by bucket")]
    Temporal,
    #[strum(to_string = "Fetching buildings")]
    FetchBuildings,
    #[strum(to_string = "Loading buildings")]
    Buildings,
    #[strum(to_string = "Joining buildings to cells")]
    Join,
    #[strum(to_string = "Exporting joined data")]
    Export,
    #[strum(to_string = "Writing map")]
    Map,
}

/// What a stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    /// Table name or file path.
    pub artifact: String,
    pub outcome: ArtifactOutcome,
    /// Rows in the table, or features in the map.
    pub rows: Option<u64>,
    /// Stage counters, present only when the stage built its artifact.
    pub details: Option<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub keys: ArtifactKeys,
    pub reports: Vec<StageReport>,
    /// Cached Parquet export of the joined table.
    pub joined_parquet: PathBuf,
    /// HTML map, unless disabled.
    pub map: Option<PathBuf>,
}

impl PipelineOutput {
    /// Report for `stage`, if it ran.
    #[must_use]
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }
}

/// Runs the pipeline for `config` against `store`.
///
/// `stage_progress` is called once per long-running stage and returns the
/// progress callback that stage reports through.
///
/// # Errors
///
/// Returns [`PipelineError::NotFound`] before any work if the trip input
/// is missing, [`PipelineError::Config`] for an invalid configuration, or
/// the error of the first stage that fails.
#[allow(clippy::too_many_lines)]
pub fn run<F>(
    config: &PipelineConfig,
    store: &mut ArtifactStore,
    mut stage_progress: F,
) -> Result<PipelineOutput, PipelineError>
where
    F: FnMut(Stage) -> Arc<dyn ProgressCallback>,
{
    config.validate()?;
    if !config.input.exists() {
        return Err(PipelineError::NotFound {
            path: config.input.display().to_string(),
        });
    }

    store.set_resource_limits(config.threads, config.memory_limit.as_deref())?;

    let keys = ArtifactKeys::for_config(config)?;
    let res = resolution(config.resolution)?;
    let columns = config.bucket.column_names();
    let mut reports = Vec::new();

    log::info!(
        "Running pipeline: input={} resolution={} bucket={} min_count={}",
        config.input.display(),
        config.resolution,
        config.bucket,
        config.min_count
    );

    let progress = stage_progress(Stage::Trips);
    let mut ingest = None;
    let outcome = store.ensure_table(&keys.trips, |conn, name| -> Result<(), PipelineError> {
        ingest = Some(build_binned_trips(conn, &config.input, res, name, &progress)?);
        Ok(())
    })?;
    let mut report = table_report(store, Stage::Trips, keys.trips.as_str(), outcome)?;
    report.details = ingest.map(|s| ingest_details(&s));
    reports.push(report);

    let outcome = store.ensure_table(&keys.temporal, |conn, name| -> Result<(), PipelineError> {
        build_temporal_table(conn, keys.trips.as_str(), name, config.bucket, config.min_count)?;
        Ok(())
    })?;
    reports.push(table_report(store, Stage::Temporal, keys.temporal.as_str(), outcome)?);

    let (buildings_file, outcome) =
        store.ensure_file(&keys.buildings, "parquet", |conn, path| -> Result<(), PipelineError> {
            fetch_to_parquet(conn, &config.buildings, &config.bbox, path)?;
            Ok(())
        })?;
    reports.push(StageReport {
        stage: Stage::FetchBuildings,
        artifact: buildings_file.display().to_string(),
        outcome,
        rows: None,
        details: None,
    });

    let outcome = store.ensure_table(&keys.buildings, |conn, name| -> Result<(), PipelineError> {
        load_buildings_table(conn, &buildings_file, name)?;
        Ok(())
    })?;
    reports.push(table_report(store, Stage::Buildings, keys.buildings.as_str(), outcome)?);

    let progress = stage_progress(Stage::Join);
    let mut join = None;
    let outcome = store.ensure_table(&keys.joined, |conn, name| -> Result<(), PipelineError> {
        join = Some(build_joined_table(
            conn,
            keys.buildings.as_str(),
            keys.temporal.as_str(),
            name,
            &columns,
            &progress,
        )?);
        Ok(())
    })?;
    let mut report = table_report(store, Stage::Join, keys.joined.as_str(), outcome)?;
    report.details = join.map(|s| join_details(&s));
    reports.push(report);

    let (joined_parquet, outcome) =
        store.ensure_file(&keys.joined, "parquet", |conn, path| -> Result<(), PipelineError> {
            ArtifactStore::export_parquet(conn, keys.joined.as_str(), path)?;
            Ok(())
        })?;
    reports.push(StageReport {
        stage: Stage::Export,
        artifact: joined_parquet.display().to_string(),
        outcome,
        rows: None,
        details: None,
    });

    let map = if config.map.enabled {
        let path = generated_dir(&config.data_dir).join(config.map_file_name());
        let rows = read_joined(store.connection(), keys.joined.as_str(), config.bucket)?;
        let features = write_map(
            &path,
            &rows,
            config.bucket,
            NYC_CENTER,
            config.map.mapbox_token.as_deref(),
        )?;
        reports.push(StageReport {
            stage: Stage::Map,
            artifact: path.display().to_string(),
            outcome: ArtifactOutcome::Built,
            rows: u64::try_from(features).ok(),
            details: None,
        });
        Some(path)
    } else {
        log::info!("Map output disabled");
        None
    };

    for report in &reports {
        log::info!(
            "{}: {} {}{}{}",
            report.stage,
            report.outcome,
            report.artifact,
            report
                .rows
                .map_or_else(String::new, |rows| format!(" ({rows} rows)")),
            report
                .details
                .as_ref()
                .map_or_else(String::new, |details| format!(" [{details}]"))
        );
    }

    Ok(PipelineOutput {
        keys,
        reports,
        joined_parquet,
        map,
    })
}

fn table_report(
    store: &ArtifactStore,
    stage: Stage,
    name: &str,
    outcome: ArtifactOutcome,
) -> Result<StageReport, StoreError> {
    Ok(StageReport {
        stage,
        artifact: name.to_string(),
        outcome,
        rows: Some(store.row_count(name)?),
        details: None,
    })
}

fn ingest_details(stats: &IngestStats) -> String {
    format!(
        "{} trips, {} coordinates, {} skipped coordinates, {} cells",
        stats.raw_trips, stats.coordinates, stats.skipped_coordinates, stats.cells
    )
}

fn join_details(stats: &JoinStats) -> String {
    format!(
        "{} of {} buildings matched, {} unparseable buildings, {} unparseable cells",
        stats.matched_buildings, stats.buildings, stats.skipped, stats.skipped_cells
    )
}
