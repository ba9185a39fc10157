//! Pipeline configuration.
//!
//! Defaults describe the stock NYC setup (May 2010 yellow-cab trips,
//! H3 resolution 10, a 20-trip threshold). A TOML file may override any
//! field; the CLI applies its flags on top of that.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, BucketScheme, NYC_BBOX};

/// Default trip file, relative to the working directory.
pub const DEFAULT_INPUT: &str = "data/yellow_tripdata_2010-05.parquet";

/// Default directory holding the database, caches, and generated output.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default H3 resolution (roughly 66m hexagon edges).
pub const DEFAULT_RESOLUTION: u8 = 10;

/// Highest H3 resolution.
pub const MAX_RESOLUTION: u8 = 15;

/// Default minimum trips per (cell, bucket) for the bucket to count.
pub const DEFAULT_MIN_COUNT: u32 = 20;

/// Overture Maps buildings release the NYC footprints are read from.
pub const OVERTURE_BUILDINGS_URI: &str =
    "s3://overturemaps-us-west-2/release/2024-09-18.0/theme=buildings/type=building/*";

/// Region of the Overture bucket.
pub const DEFAULT_S3_REGION: &str = "us-west-2";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`PipelineConfig`].
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Whether existing cache artifacts are reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// An artifact that exists under its name is reused as-is.
    #[default]
    Reuse,
    /// Every artifact touched by the run is dropped and rebuilt once.
    Rebuild,
}

/// How the building source stores its geometry column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingGeometry {
    /// Native GeoParquet geometry, converted with the `spatial` extension.
    #[default]
    Native,
    /// Already GeoJSON text.
    Geojson,
}

/// Where building footprints come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildingsConfig {
    /// Parquet URI or glob (`s3://...` or a local path).
    pub uri: String,
    /// Encoding of the `geometry` column at `uri`.
    pub geometry: BuildingGeometry,
    /// S3 region for remote URIs.
    pub s3_region: String,
}

impl Default for BuildingsConfig {
    fn default() -> Self {
        Self {
            uri: OVERTURE_BUILDINGS_URI.to_string(),
            geometry: BuildingGeometry::Native,
            s3_region: DEFAULT_S3_REGION.to_string(),
        }
    }
}

impl BuildingsConfig {
    /// Remote sources need the `httpfs` extension.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        ["s3://", "http://", "https://"]
            .iter()
            .any(|scheme| self.uri.starts_with(scheme))
    }
}

/// Map output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Whether the HTML map is written at the end of the run.
    pub enabled: bool,
    /// Output file name inside the generated directory. Defaults to
    /// `taxi_map_<bucket>.html`.
    pub file_name: Option<String>,
    /// Mapbox token for the base map tiles.
    pub mapbox_token: Option<String>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: None,
            mapbox_token: None,
        }
    }
}

/// Full configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trip Parquet file.
    pub input: PathBuf,
    /// Root for `taxi_map.duckdb`, `cache/`, and `generated/`.
    pub data_dir: PathBuf,
    /// H3 resolution pickups are binned at.
    pub resolution: u8,
    /// Minimum trips per (cell, bucket).
    pub min_count: u32,
    /// Temporal bucket scheme.
    pub bucket: BucketScheme,
    /// Extent buildings are filtered to.
    pub bbox: BoundingBox,
    pub buildings: BuildingsConfig,
    pub cache_policy: CachePolicy,
    pub map: MapConfig,
    /// `DuckDB` worker threads.
    pub threads: Option<u32>,
    /// `DuckDB` memory limit, e.g. `"4GB"`.
    pub memory_limit: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            resolution: DEFAULT_RESOLUTION,
            min_count: DEFAULT_MIN_COUNT,
            bucket: BucketScheme::default(),
            bbox: NYC_BBOX,
            buildings: BuildingsConfig::default(),
            cache_policy: CachePolicy::default(),
            map: MapConfig::default(),
            threads: None,
            memory_limit: None,
        }
    }
}

impl PipelineConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is out
    /// of range.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an out-of-range resolution, a
    /// zero threshold, or an invalid bounding box.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution > MAX_RESOLUTION {
            return Err(ConfigError::Invalid {
                message: format!(
                    "resolution {} is above the maximum of {MAX_RESOLUTION}",
                    self.resolution
                ),
            });
        }
        if self.min_count == 0 {
            return Err(ConfigError::Invalid {
                message: "min_count must be at least 1".to_string(),
            });
        }
        self.bbox.validate()
    }

    /// File name of the HTML map.
    #[must_use]
    pub fn map_file_name(&self) -> String {
        self.map
            .file_name
            .clone()
            .unwrap_or_else(|| format!("taxi_map_{}.html", self.bucket))
    }
}
