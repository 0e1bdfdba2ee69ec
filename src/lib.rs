//! # Rasterizing Cache
//!
//! A map tile server kernel that keeps rendered tiles in a bounded image
//! cache and re-renders them on demand after eviction.
//!
//! Each render request is identified by a fingerprint of everything that
//! determines the image. The inputs are stored in a long-lived *rebuild*
//! tier, the rendered bytes in a short-lived *rasterizing* tier. When an
//! image has been evicted, its URL still works: the service renders it again
//! from the rebuild record.
//!
//! ## Architecture
//!
//! - [`tile`] - Tile identity, geometry and round-robin tile URLs
//! - [`cache`] - Memory and disk stores and the two-tier cache
//! - [`rasterizing`] - Rebuild-cache coordinator and rendering delegates
//! - [`layer`] - Layer catalog
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust
//! use rasterizing_cache::{
//!     LayerCatalog, RasterizingService, SecurityContext, StyledTileRenderer, TileCode,
//!     TileMetadata, TwoTierCache,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = RasterizingService::new(
//!         TwoTierCache::in_memory(),
//!         StyledTileRenderer::new(),
//!         LayerCatalog::default_catalog(),
//!     );
//!
//!     let metadata = TileMetadata::new("osm", TileCode::new(2, 1, 3), "EPSG:3857", 1e-5)
//!         .with_style("fill", "#3388ff");
//!     let prepared = service
//!         .prepare(metadata, SecurityContext::unrestricted())
//!         .await
//!         .unwrap();
//!
//!     let tile = service.get("osm", &prepared.key).await.unwrap();
//!     assert_eq!(tile.container.content_type, "image/png");
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod layer;
pub mod rasterizing;
pub mod server;
pub mod tile;

pub use cache::{CacheCategory, CacheStore, DiskCache, MemoryCache, TierConfig, TwoTierCache};
pub use config::{Cli, Command, ServeConfig};
pub use error::{CacheError, ConfigError, GeometryError, RasterizeError, RenderError};
pub use layer::{LayerCatalog, LayerInfo};
pub use rasterizing::{
    fingerprint, CacheOutcome, RasterizingService, RenderContext, RenderingDelegate,
    SecurityContext, StyledTileRenderer, TileMetadata,
};
pub use server::{create_router, AppState, RouterConfig};
pub use tile::{Envelope, RoundRobinUrlBuilder, TileCode, TileGeometry};
