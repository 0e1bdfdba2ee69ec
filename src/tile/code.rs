//! Tile identity within a quad-tree pyramid.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column value marking a super tile (a tile that is not a grid cell).
pub const SUPER_TILE_X: i32 = -1;

/// Identifies one tile of the pyramid by zoom level and grid position.
///
/// Codes are plain values: derived codes (see [`TileCode::parent`]) are new
/// instances, nothing is ever mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCode {
    /// Zoom depth (0 = whole extent in one tile)
    pub level: u32,

    /// Column, counted from the extent's minimum x
    pub x: i32,

    /// Row, counted from the extent's minimum y
    pub y: i32,
}

impl TileCode {
    /// Create a tile code. No validation is performed.
    pub const fn new(level: u32, x: i32, y: i32) -> Self {
        Self { level, x, y }
    }

    /// Create the super tile sentinel for a level.
    pub const fn super_tile(level: u32) -> Self {
        Self {
            level,
            x: SUPER_TILE_X,
            y: 0,
        }
    }

    /// Whether this is the super tile sentinel.
    pub fn is_super(&self) -> bool {
        self.x == SUPER_TILE_X
    }

    /// Whether this code names a real grid cell.
    pub fn is_grid_cell(&self) -> bool {
        self.x >= 0 && self.y >= 0
    }

    /// The tile one level up that contains this one.
    ///
    /// Returns `None` at level 0 and for codes that are not grid cells.
    pub fn parent(&self) -> Option<TileCode> {
        if self.level == 0 || !self.is_grid_cell() {
            return None;
        }
        Some(TileCode::new(self.level - 1, self.x / 2, self.y / 2))
    }
}

impl fmt::Display for TileCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_super() {
            write!(f, "super")
        } else {
            write!(f, "{}-{}-{}", self.level, self.x, self.y)
        }
    }
}
