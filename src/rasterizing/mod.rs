//! Rasterizing pipeline.
//!
//! A render request is first *prepared*: its layer and geometry are checked
//! and a rebuild record is stored under the request's fingerprint. The image
//! itself is rendered lazily, the first time its URL is fetched, and cached in
//! the image tier. When the image tier later drops the image, the next fetch
//! renders it again from the rebuild record.
//!
//! - [`RasterizingService`]: cache coordinator
//! - [`RenderingDelegate`]: pluggable renderer
//! - [`StyledTileRenderer`]: built-in renderer painting style colors

mod delegate;
mod service;
mod types;

pub use delegate::{
    RenderContext, RenderingDelegate, StyledTileRenderer, MAX_TILE_SIZE, STYLE_FILL, STYLE_STROKE,
    STYLE_STROKE_WIDTH,
};
pub use service::{CacheOutcome, RasterizingResponse, RasterizingService, ServiceStats};
pub use types::{
    fingerprint, rasterizing_path, PreparedTile, RasterizingContainer, RebuildCacheContainer,
    SecurityContext, TileMetadata, ALL_LAYERS, PNG_CONTENT_TYPE,
};
