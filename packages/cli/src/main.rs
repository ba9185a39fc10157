#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the NYC taxi pickup building map.
//!
//! Uses `indicatif-log-bridge` (via [`taxi_map_cli_utils::init_logger`])
//! so log lines and progress bars share the terminal cleanly. The pipeline
//! and the report block on `DuckDB`, so they run on the blocking pool.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use taxi_map_cli_utils::{IndicatifProgress, MultiProgress};
use taxi_map_database::paths::{cache_dir, database_path};
use taxi_map_database::store::{ArtifactKind, ArtifactStore};
use taxi_map_pipeline_models::{BucketScheme, CachePolicy, PipelineConfig};

#[derive(Parser)]
#[command(name = "taxi_map", about = "NYC taxi pickup building map")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the HTML map
    Run {
        /// TOML config file. Flags override values from the file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Temporal bucket scheme ("day" or "hour")
        #[arg(long)]
        bucket: Option<BucketScheme>,
        /// Trip Parquet file
        #[arg(long)]
        input: Option<PathBuf>,
        /// Minimum trips per cell and bucket
        #[arg(long)]
        min_count: Option<u32>,
        /// H3 resolution (0-15)
        #[arg(long)]
        resolution: Option<u8>,
        /// Directory holding the database, cache, and generated output
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Rebuild every artifact instead of reusing cached ones
        #[arg(long)]
        rebuild: bool,
        /// Skip writing the HTML map
        #[arg(long)]
        no_map: bool,
    },
    /// Count trips per weekday and month across a directory of trip files
    Report {
        /// Directory of trip Parquet files
        #[arg(long, default_value = "data")]
        dir: PathBuf,
        /// CSV output file. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download one month of yellow-cab trips from the TLC mirror
    FetchTrips {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        /// Destination directory
        #[arg(long, default_value = "data")]
        dest: PathBuf,
    },
    /// Inspect or clear cached artifacts
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
        #[arg(long, default_value = "data", global = true)]
        data_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached tables and files
    List,
    /// Drop every cached table and delete every cached file
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let multi = taxi_map_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            bucket,
            input,
            min_count,
            resolution,
            data_dir,
            rebuild,
            no_map,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(bucket) = bucket {
                config.bucket = bucket;
            }
            if let Some(input) = input {
                config.input = input;
            }
            if let Some(min_count) = min_count {
                config.min_count = min_count;
            }
            if let Some(resolution) = resolution {
                config.resolution = resolution;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if rebuild {
                config.cache_policy = CachePolicy::Rebuild;
            }
            if no_map {
                config.map.enabled = false;
            }

            let start = Instant::now();
            let output =
                tokio::task::spawn_blocking(move || run_pipeline(&config, &multi)).await??;

            if let Some(map) = &output.map {
                log::info!("Map written to {}", map.display());
            }
            log::info!("Pipeline complete in {:.1}s", start.elapsed().as_secs_f64());
        }
        Commands::Report { dir, output } => {
            let report = tokio::task::spawn_blocking(move || {
                let conn = duckdb::Connection::open_in_memory()?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(
                    taxi_map_trips::report::daily_counts(&conn, &dir)?,
                )
            })
            .await??;

            if let Some(path) = output {
                let file = std::fs::File::create(&path)?;
                report.write_csv(file)?;
                log::info!("Report written to {}", path.display());
            } else {
                report.write_csv(std::io::stdout().lock())?;
            }
            log::info!(
                "{} trips across {} month(s)",
                report.total(),
                report.months().len()
            );
        }
        Commands::FetchTrips { year, month, dest } => {
            let progress = IndicatifProgress::bytes_bar(&multi, "Downloading");
            let path =
                taxi_map_trips::download::download_trip_month(year, month, &dest, &progress)
                    .await?;
            log::info!("Saved {}", path.display());
        }
        Commands::Cache { command, data_dir } => {
            let store = ArtifactStore::open(
                &database_path(&data_dir),
                &cache_dir(&data_dir),
                CachePolicy::Reuse,
            )?;

            match command {
                CacheCommands::List => {
                    let artifacts = store.list()?;
                    if artifacts.is_empty() {
                        println!("No cached artifacts in {}", data_dir.display());
                    }
                    for artifact in artifacts {
                        match artifact.kind {
                            ArtifactKind::Table { rows } => {
                                println!("table  {:<40} {rows:>12} rows", artifact.name);
                            }
                            ArtifactKind::File { bytes } => {
                                println!("file   {:<40} {bytes:>12} bytes", artifact.name);
                            }
                        }
                    }
                }
                CacheCommands::Clear => {
                    let removed = store.clear()?;
                    log::info!("Removed {removed} cached artifact(s)");
                }
            }
        }
    }

    Ok(())
}

fn run_pipeline(
    config: &PipelineConfig,
    multi: &MultiProgress,
) -> Result<taxi_map_pipeline::PipelineOutput, taxi_map_pipeline::PipelineError> {
    let mut store = ArtifactStore::open(
        &database_path(&config.data_dir),
        &cache_dir(&config.data_dir),
        config.cache_policy,
    )?;

    taxi_map_pipeline::run(config, &mut store, |stage| {
        IndicatifProgress::stage_bar(multi, &stage.to_string())
    })
}
