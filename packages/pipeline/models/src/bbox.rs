//! Geographic extents.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Axis-aligned lon/lat rectangle in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// New York City extent buildings are filtered to.
pub const NYC_BBOX: BoundingBox = BoundingBox {
    xmin: -74.275_07,
    ymin: 40.488_386,
    xmax: -73.729_05,
    ymax: 40.957_151,
};

/// Initial map viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCenter {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
}

/// Viewport centred on lower Manhattan.
pub const NYC_CENTER: MapCenter = MapCenter {
    latitude: 40.7128,
    longitude: -74.0060,
    zoom: 11.0,
};

impl BoundingBox {
    /// Checks that min is below max on both axes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty, inverted, or
    /// non-finite box.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.xmin >= self.xmax || self.ymin >= self.ymax {
            return Err(ConfigError::Invalid {
                message: format!("invalid bounding box {self:?}"),
            });
        }
        Ok(())
    }
}

/// Parses `xmin,ymin,xmax,ymax`.
impl FromStr for BoundingBox {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Invalid {
                message: format!("bounding box '{s}': {e}"),
            })?;

        let &[xmin, ymin, xmax, ymax] = values.as_slice() else {
            return Err(ConfigError::Invalid {
                message: format!("bounding box '{s}' must have four values"),
            });
        };

        let bbox = Self {
            xmin,
            ymin,
            xmax,
            ymax,
        };
        bbox.validate()?;
        Ok(bbox)
    }
}
