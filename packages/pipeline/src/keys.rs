//! Artifact names for one pipeline configuration.
//!
//! Each name hashes the parameters of its stage plus the names of the
//! artifacts it is built from, so a change anywhere upstream gives every
//! downstream artifact a new name.

use serde::Serialize;
use taxi_map_database::StoreError;
use taxi_map_database::key::ArtifactKey;
use taxi_map_pipeline_models::{BoundingBox, BucketScheme, BuildingGeometry, PipelineConfig};

#[derive(Serialize)]
struct TripParams {
    input: String,
    resolution: u8,
}

#[derive(Serialize)]
struct TemporalParams<'a> {
    trips: &'a str,
    bucket: BucketScheme,
    min_count: u32,
}

#[derive(Serialize)]
struct BuildingParams<'a> {
    uri: &'a str,
    geometry: BuildingGeometry,
    bbox: BoundingBox,
}

#[derive(Serialize)]
struct JoinParams<'a> {
    temporal: &'a str,
    buildings: &'a str,
}

/// Names of every artifact a run reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    /// Binned trips table.
    pub trips: ArtifactKey,
    /// Per-cell, per-bucket aggregate table.
    pub temporal: ArtifactKey,
    /// Building footprints: a cached Parquet file and a table of the same
    /// name.
    pub buildings: ArtifactKey,
    /// Joined table, also exported as a cached Parquet file.
    pub joined: ArtifactKey,
}

impl ArtifactKeys {
    /// Derives all names from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the parameters cannot be encoded.
    pub fn for_config(config: &PipelineConfig) -> Result<Self, StoreError> {
        let trips = ArtifactKey::derive(
            "trips",
            &TripParams {
                input: config.input.display().to_string(),
                resolution: config.resolution,
            },
        )?;
        let temporal = ArtifactKey::derive(
            "temporal",
            &TemporalParams {
                trips: trips.as_str(),
                bucket: config.bucket,
                min_count: config.min_count,
            },
        )?;
        let buildings = ArtifactKey::derive(
            "buildings",
            &BuildingParams {
                uri: &config.buildings.uri,
                geometry: config.buildings.geometry,
                bbox: config.bbox,
            },
        )?;
        let joined = ArtifactKey::derive(
            "joined",
            &JoinParams {
                temporal: temporal.as_str(),
                buildings: buildings.as_str(),
            },
        )?;

        Ok(Self {
            trips,
            temporal,
            buildings,
            joined,
        })
    }
}
