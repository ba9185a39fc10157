//! Kepler.gl map configuration.
//!
//! Mirrors the subset of the Kepler.gl `v1` config schema the map uses:
//! one `geojson` layer per bucket, coloured by that bucket's count column,
//! with only the first layer visible.

use std::collections::BTreeMap;

use serde::Serialize;
use taxi_map_pipeline_models::{BucketScheme, MapCenter};

/// Column `KeplerGl.processGeojson` stores feature geometry in.
pub const GEOJSON_COLUMN: &str = "_geojson";

/// Layer fill opacity.
pub const LAYER_OPACITY: f64 = 0.8;

/// The nine-stop "Ocean Blue" sequential range, low to high.
pub const OCEAN_BLUE: [&str; 9] = [
    "#008080", "#009999", "#00CCCC", "#00FFFF", "#FFCCCC", "#FF9999", "#FF6666", "#FF3333",
    "#FF0000",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeplerConfig {
    pub version: &'static str,
    pub config: MapDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDocument {
    pub vis_state: VisState,
    pub map_state: MapState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisState {
    pub filters: Vec<serde_json::Value>,
    pub layers: Vec<Layer>,
    pub interaction_config: InteractionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub config: LayerConfig,
    pub visual_channels: VisualChannels,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub data_id: String,
    pub label: String,
    pub columns: BTreeMap<&'static str, &'static str>,
    pub is_visible: bool,
    pub vis_config: VisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisConfig {
    pub opacity: f64,
    pub filled: bool,
    pub enable3d: bool,
    pub color_range: ColorRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorRange {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub category: &'static str,
    pub colors: Vec<&'static str>,
}

impl ColorRange {
    #[must_use]
    pub fn ocean_blue() -> Self {
        Self {
            name: "Ocean Blue",
            kind: "sequential",
            category: "Uber",
            colors: OCEAN_BLUE.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualChannels {
    pub color_field: Field,
    pub color_scale: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionConfig {
    pub tooltip: Tooltip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tooltip {
    /// Dataset id -> fields shown on hover.
    pub fields_to_show: BTreeMap<String, Vec<TooltipField>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TooltipField {
    pub name: String,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
}

impl From<MapCenter> for MapState {
    fn from(center: MapCenter) -> Self {
        Self {
            latitude: center.latitude,
            longitude: center.longitude,
            zoom: center.zoom,
            pitch: 0.0,
            bearing: 0.0,
        }
    }
}

/// Builds the map config for `scheme`: one layer per bucket, the first
/// visible, all reading from the dataset [`BucketScheme::dataset_label`].
#[must_use]
pub fn build_config(scheme: BucketScheme, center: MapCenter) -> KeplerConfig {
    let data_id = scheme.dataset_label().to_string();
    let buckets = scheme.buckets();

    let layers = buckets
        .iter()
        .enumerate()
        .map(|(i, bucket)| Layer {
            id: format!("buildings-layer-{}", bucket.key),
            kind: "geojson",
            config: LayerConfig {
                data_id: data_id.clone(),
                label: BucketScheme::layer_label(bucket),
                columns: BTreeMap::from([("geojson", GEOJSON_COLUMN)]),
                is_visible: i == 0,
                vis_config: VisConfig {
                    opacity: LAYER_OPACITY,
                    filled: true,
                    enable3d: false,
                    color_range: ColorRange::ocean_blue(),
                },
            },
            visual_channels: VisualChannels {
                color_field: Field {
                    name: bucket.column(),
                    kind: "integer",
                },
                color_scale: "quantile",
            },
        })
        .collect();

    let tooltip_fields = buckets
        .iter()
        .map(|bucket| TooltipField {
            name: bucket.column(),
            format: None,
        })
        .collect();

    KeplerConfig {
        version: "v1",
        config: MapDocument {
            vis_state: VisState {
                filters: Vec::new(),
                layers,
                interaction_config: InteractionConfig {
                    tooltip: Tooltip {
                        fields_to_show: BTreeMap::from([(data_id, tooltip_fields)]),
                        enabled: true,
                    },
                },
            },
            map_state: center.into(),
        },
    }
}
