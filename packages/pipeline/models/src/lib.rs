#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the taxi map pipeline.
//!
//! Everything here is plain data: the temporal bucket schemes trips are
//! aggregated by, the fixed NYC bounding box buildings are filtered to, the
//! pipeline configuration, and the [`progress::ProgressCallback`] trait that
//! stages report through.

pub mod bbox;
pub mod bucket;
pub mod config;
pub mod progress;

pub use bbox::{BoundingBox, MapCenter, NYC_BBOX, NYC_CENTER};
pub use bucket::{Bucket, BucketScheme, Weekday};
pub use config::{
    BuildingGeometry, BuildingsConfig, CachePolicy, ConfigError, MapConfig, PipelineConfig,
};
