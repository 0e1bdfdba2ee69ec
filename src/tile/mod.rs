//! Tile addressing.
//!
//! This module names tiles and places them in the world:
//!
//! - [`TileCode`]: immutable `(level, x, y)` identity of a tile
//! - [`TileGeometry`]: world bounds and pixel size of the tiles of one level
//! - [`RoundRobinUrlBuilder`]: spreads tile URLs over several subdomains
//!
//! # Example
//!
//! ```
//! use rasterizing_cache::tile::{Envelope, TileCode, TileGeometry};
//!
//! let extent = Envelope::new(0.0, 0.0, 1024.0, 1024.0);
//! let geometry = TileGeometry::new(extent, 1.0, 2).unwrap();
//!
//! let bounds = geometry.bounds_for(&TileCode::new(2, 1, 0)).unwrap();
//! assert_eq!(bounds.min_x, 256.0);
//! assert_eq!(geometry.screen_width(), 256);
//! ```

mod code;
mod geometry;
mod url;

pub use code::{TileCode, SUPER_TILE_X};
pub use geometry::{Envelope, TileGeometry};
pub use url::{
    RoundRobinUrlBuilder, UrlCursor, DEFAULT_EXTENSION, DEFAULT_SUBDOMAINS, DEFAULT_TEMPLATE,
};
