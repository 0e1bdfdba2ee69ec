//! Tile geometry calculation.
//!
//! Converts a [`TileCode`] into world-space bounds and a pixel size, given a
//! layer's maximum extent and the map scale (pixels per world unit).
//!
//! # Rounding
//!
//! The tile size in pixels is rounded up so every tile covers a whole number
//! of device pixels:
//!
//! ```text
//! divisor     = 2^level
//! tile_width  = ceil(scale * extent_width / divisor) / scale
//! tile_height = ceil(scale * extent_height / divisor) / scale
//! ```
//!
//! Adjacent tiles therefore meet exactly on pixel boundaries, and the tiles of
//! a level may reach slightly past the extent's maximum corner.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

use super::code::TileCode;

/// Tolerance used when counting tiles, to absorb floating point noise.
const COUNT_EPSILON: f64 = 1e-9;

// =============================================================================
// Envelope
// =============================================================================

/// Axis-aligned world-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Inclusive point containment.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether the two boxes share any area or edge.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

// =============================================================================
// Tile Geometry
// =============================================================================

/// Tile dimensions for one level of a layer's pyramid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGeometry {
    max_extent: Envelope,
    scale: f64,
    level: u32,
    tile_width: f64,
    tile_height: f64,
    screen_width: u32,
    screen_height: u32,
}

impl TileGeometry {
    /// Compute the tile size for `level` at `scale` (pixels per world unit).
    ///
    /// Only the scale is checked here; a degenerate extent is reported by
    /// [`TileGeometry::bounds_for`].
    pub fn new(max_extent: Envelope, scale: f64, level: u32) -> Result<Self, GeometryError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(GeometryError::InvalidScale(scale));
        }

        let divisor = 2f64.powi(level.min(i32::MAX as u32) as i32);

        // Pixel counts are the rounded-up values; the world size follows from them.
        let pixels_x = (scale * max_extent.width().max(0.0) / divisor).ceil();
        let pixels_y = (scale * max_extent.height().max(0.0) / divisor).ceil();

        Ok(Self {
            max_extent,
            scale,
            level,
            tile_width: pixels_x / scale,
            tile_height: pixels_y / scale,
            screen_width: pixels_x.min(u32::MAX as f64) as u32,
            screen_height: pixels_y.min(u32::MAX as f64) as u32,
        })
    }

    pub fn max_extent(&self) -> &Envelope {
        &self.max_extent
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Tile width in world units.
    pub fn tile_width(&self) -> f64 {
        self.tile_width
    }

    /// Tile height in world units.
    pub fn tile_height(&self) -> f64 {
        self.tile_height
    }

    /// Tile width in pixels.
    pub fn screen_width(&self) -> u32 {
        self.screen_width
    }

    /// Tile height in pixels.
    pub fn screen_height(&self) -> u32 {
        self.screen_height
    }

    fn check_degenerate(&self) -> Result<(), GeometryError> {
        if self.tile_width <= 0.0 || self.tile_height <= 0.0 {
            return Err(GeometryError::DegenerateExtent {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        Ok(())
    }

    /// World-space bounds of the tile named by `code`.
    ///
    /// The code's level is not checked against this geometry's level.
    pub fn bounds_for(&self, code: &TileCode) -> Result<Envelope, GeometryError> {
        if code.is_super() {
            return Err(GeometryError::SuperTile { level: code.level });
        }
        if !code.is_grid_cell() {
            return Err(GeometryError::NotGridCell {
                x: code.x,
                y: code.y,
            });
        }
        self.check_degenerate()?;

        let origin_x = self.max_extent.min_x + code.x as f64 * self.tile_width;
        let origin_y = self.max_extent.min_y + code.y as f64 * self.tile_height;

        Ok(Envelope::new(
            origin_x,
            origin_y,
            origin_x + self.tile_width,
            origin_y + self.tile_height,
        ))
    }

    /// Number of columns and rows needed to cover the extent.
    pub fn tile_counts(&self) -> Result<(u32, u32), GeometryError> {
        self.check_degenerate()?;

        let cols = (self.max_extent.width() / self.tile_width - COUNT_EPSILON)
            .ceil()
            .max(1.0);
        let rows = (self.max_extent.height() / self.tile_height - COUNT_EPSILON)
            .ceil()
            .max(1.0);

        Ok((cols as u32, rows as u32))
    }

    /// Every grid code at this level, row by row.
    pub fn codes(&self) -> Result<impl Iterator<Item = TileCode>, GeometryError> {
        let (cols, rows) = self.tile_counts()?;
        let level = self.level;
        Ok((0..rows)
            .flat_map(move |y| (0..cols).map(move |x| TileCode::new(level, x as i32, y as i32))))
    }

    /// Code of the tile containing the world point, or `None` outside the extent.
    pub fn code_at(&self, x: f64, y: f64) -> Option<TileCode> {
        if !self.max_extent.contains_point(x, y) {
            return None;
        }
        let (cols, rows) = self.tile_counts().ok()?;

        let col = ((x - self.max_extent.min_x) / self.tile_width).floor() as u32;
        let row = ((y - self.max_extent.min_y) / self.tile_height).floor() as u32;

        Some(TileCode::new(
            self.level,
            col.min(cols - 1) as i32,
            row.min(rows - 1) as i32,
        ))
    }
}
