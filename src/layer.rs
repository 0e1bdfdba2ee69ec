//! Layer catalog.
//!
//! Layers are resolved once, when the server starts, into [`LayerInfo`]
//! values. Request handling only ever looks layers up by id.
//!
//! The catalog file is a JSON array:
//!
//! ```json
//! [
//!   {
//!     "id": "osm",
//!     "crs": "EPSG:3857",
//!     "max_extent": { "min_x": -20037508.34, "min_y": -20037508.34,
//!                     "max_x": 20037508.34, "max_y": 20037508.34 }
//!   }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tile::Envelope;

/// Half the circumference of the Web Mercator world, in meters.
pub const WEB_MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// Id of the layer present when no catalog file is configured.
pub const DEFAULT_LAYER_ID: &str = "osm";

/// A configured map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: String,

    /// Coordinate reference system of the layer's data, e.g. `EPSG:3857`
    pub crs: String,

    /// Extent that level 0 covers in a single tile
    pub max_extent: Envelope,
}

/// All layers the server can rasterize.
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    layers: HashMap<String, LayerInfo>,
}

impl LayerCatalog {
    pub fn new(layers: impl IntoIterator<Item = LayerInfo>) -> Self {
        Self {
            layers: layers
                .into_iter()
                .map(|layer| (layer.id.clone(), layer))
                .collect(),
        }
    }

    /// A catalog with a single Web Mercator world layer named `osm`.
    pub fn default_catalog() -> Self {
        Self::new([LayerInfo {
            id: DEFAULT_LAYER_ID.to_string(),
            crs: "EPSG:3857".to_string(),
            max_extent: Envelope::new(
                -WEB_MERCATOR_HALF_WORLD,
                -WEB_MERCATOR_HALF_WORLD,
                WEB_MERCATOR_HALF_WORLD,
                WEB_MERCATOR_HALF_WORLD,
            ),
        }])
    }

    /// Parse a catalog from its JSON representation.
    pub fn from_json(json: &str, origin: &str) -> Result<Self, ConfigError> {
        let layers: Vec<LayerInfo> =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
                path: origin.to_string(),
                message: e.to_string(),
            })?;

        let mut catalog = HashMap::with_capacity(layers.len());
        for layer in layers {
            if layer.id.is_empty() {
                return Err(ConfigError::Invalid {
                    path: origin.to_string(),
                    message: "layer id must not be empty".to_string(),
                });
            }
            if layer.max_extent.width() <= 0.0 || layer.max_extent.height() <= 0.0 {
                return Err(ConfigError::Invalid {
                    path: origin.to_string(),
                    message: format!("layer {} has an empty max_extent", layer.id),
                });
            }
            if catalog.contains_key(&layer.id) {
                return Err(ConfigError::Invalid {
                    path: origin.to_string(),
                    message: format!("duplicate layer id {}", layer.id),
                });
            }
            catalog.insert(layer.id.clone(), layer);
        }

        Ok(Self { layers: catalog })
    }

    /// Load a catalog file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&json, &display)
    }

    pub fn get(&self, layer_id: &str) -> Option<&LayerInfo> {
        self.layers.get(layer_id)
    }

    /// Layer ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.layers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
