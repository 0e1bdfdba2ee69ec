//! Values flowing through the rasterizing pipeline.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::tile::{Envelope, TileCode};

/// Content type of PNG tiles.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Authorization granting access to every layer.
pub const ALL_LAYERS: &str = "*";

// =============================================================================
// Tile Metadata
// =============================================================================

/// Everything that determines what a rendered tile looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub layer_id: String,
    pub code: TileCode,

    /// Coordinate reference system the tile is rendered in
    pub crs: String,

    /// Pixels per world unit
    pub scale: f64,

    /// Style parameters; a sorted map so serialization is deterministic
    #[serde(default)]
    pub style: BTreeMap<String, String>,

    /// Feature filter expression, passed through to the renderer
    #[serde(default)]
    pub filter: Option<String>,
}

impl TileMetadata {
    pub fn new(layer_id: impl Into<String>, code: TileCode, crs: impl Into<String>, scale: f64) -> Self {
        Self {
            layer_id: layer_id.into(),
            code,
            crs: crs.into(),
            scale,
            style: BTreeMap::new(),
            filter: None,
        }
    }

    pub fn with_style(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(name.into(), value.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

// =============================================================================
// Security Context
// =============================================================================

/// Snapshot of the requesting caller's rights.
///
/// The snapshot is stored with the rebuild record so a tile rendered again
/// later is rendered with the original caller's rights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default)]
    pub user_id: Option<String>,

    /// Layer ids the caller may view, or `*` for all of them
    #[serde(default)]
    pub authorizations: Vec<String>,
}

impl SecurityContext {
    pub fn new(user_id: Option<String>, authorizations: Vec<String>) -> Self {
        Self {
            user_id,
            authorizations,
        }
    }

    /// A caller allowed to see every layer.
    pub fn unrestricted() -> Self {
        Self::new(None, vec![ALL_LAYERS.to_string()])
    }

    pub fn can_view_layer(&self, layer_id: &str) -> bool {
        self.authorizations
            .iter()
            .any(|a| a == ALL_LAYERS || a == layer_id)
    }
}

// =============================================================================
// Fingerprint
// =============================================================================

#[derive(Serialize)]
struct FingerprintInput<'a> {
    layer_id: &'a str,
    code: &'a TileCode,
    crs: &'a str,
    scale: f64,
    style: &'a BTreeMap<String, String>,
    filter: Option<&'a str>,
    authorizations: Vec<&'a str>,
}

/// Stable cache key of a render request.
///
/// Lowercase hex SHA-256 of the canonical JSON of the metadata and the sorted
/// authorizations. The user id is not part of the key: callers with the same
/// rights share tiles.
pub fn fingerprint(metadata: &TileMetadata, security: &SecurityContext) -> String {
    let mut authorizations: Vec<&str> = security.authorizations.iter().map(String::as_str).collect();
    authorizations.sort_unstable();
    authorizations.dedup();

    let input = FingerprintInput {
        layer_id: &metadata.layer_id,
        code: &metadata.code,
        crs: &metadata.crs,
        scale: metadata.scale,
        style: &metadata.style,
        filter: metadata.filter.as_deref(),
        authorizations,
    };

    // Serializing plain structs, strings and a BTreeMap cannot fail.
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

// =============================================================================
// Containers
// =============================================================================

/// Inputs needed to render a tile again, stored in the rebuild tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildCacheContainer {
    pub metadata: TileMetadata,
    pub security: SecurityContext,
}

impl RebuildCacheContainer {
    pub fn to_bytes(&self) -> Result<Bytes, CacheError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(raw).map_err(|e| CacheError::Corrupt(e.to_string()))
    }
}

/// A rendered tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizingContainer {
    pub data: Bytes,
    pub content_type: String,
}

impl RasterizingContainer {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    pub fn png(data: impl Into<Bytes>) -> Self {
        Self::new(data, PNG_CONTENT_TYPE)
    }

    /// Frame as `u16 content type length | content type | image bytes`.
    pub fn encode(&self) -> Bytes {
        let content_type = self.content_type.as_bytes();
        let len = content_type.len().min(u16::MAX as usize);

        let mut buf = BytesMut::with_capacity(2 + len + self.data.len());
        buf.put_u16(len as u16);
        buf.put_slice(&content_type[..len]);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(raw: Bytes) -> Result<Self, CacheError> {
        if raw.len() < 2 {
            return Err(CacheError::Corrupt("image entry too short".to_string()));
        }
        let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if raw.len() < 2 + len {
            return Err(CacheError::Corrupt(
                "image entry content type truncated".to_string(),
            ));
        }
        let content_type = std::str::from_utf8(&raw[2..2 + len])
            .map_err(|e| CacheError::Corrupt(e.to_string()))?
            .to_string();

        Ok(Self {
            data: raw.slice(2 + len..),
            content_type,
        })
    }
}

/// Answer to a render request before anything is rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedTile {
    pub layer_id: String,
    pub code: TileCode,

    /// Fingerprint under which the tile is cached
    pub key: String,

    /// Path the image can be fetched from
    pub url: String,

    pub bounds: Envelope,
    pub screen_width: u32,
    pub screen_height: u32,
}

/// Request path of a rasterized tile image.
pub fn rasterizing_path(layer_id: &str, key: &str) -> String {
    format!("/rasterizing/layer/{}/{}.png", layer_id, key)
}
