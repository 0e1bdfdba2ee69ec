//! Rendering delegate boundary.
//!
//! The service never draws anything itself; it hands a fully resolved
//! [`RenderContext`] to a [`RenderingDelegate`] and caches whatever comes
//! back. [`StyledTileRenderer`] is a small built-in delegate that paints a
//! tile from its style parameters.

use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

use crate::error::RenderError;
use crate::layer::LayerInfo;
use crate::tile::{Envelope, TileGeometry};

use super::types::{RasterizingContainer, SecurityContext, TileMetadata};

/// Largest tile side the built-in renderer accepts, in pixels.
pub const MAX_TILE_SIZE: u32 = 4096;

/// Style parameter holding the fill color.
pub const STYLE_FILL: &str = "fill";

/// Style parameter holding the border color.
pub const STYLE_STROKE: &str = "stroke";

/// Style parameter holding the border width in pixels.
pub const STYLE_STROKE_WIDTH: &str = "stroke-width";

/// Everything a delegate needs to render one tile.
///
/// Built fresh for every render and passed down explicitly; nothing is read
/// from ambient per-thread state.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub metadata: TileMetadata,
    pub layer: LayerInfo,
    pub geometry: TileGeometry,

    /// World bounds of the tile
    pub bounds: Envelope,

    /// Rights of the caller that originally requested the tile
    pub security: SecurityContext,
}

/// Produces image bytes for a tile.
///
/// Rendering must be idempotent: the same context always yields an
/// equivalent image, because results may be discarded and rendered again.
#[async_trait]
pub trait RenderingDelegate: Send + Sync {
    async fn render(&self, context: &RenderContext) -> Result<RasterizingContainer, RenderError>;

    /// Largest tile side, in pixels, this delegate can render. Requests for
    /// bigger tiles are turned away before a rebuild record is stored.
    fn max_tile_size(&self) -> Option<u32> {
        None
    }
}

// =============================================================================
// Styled Tile Renderer
// =============================================================================

/// Paints each tile with a fill color and an optional border.
///
/// Recognized style parameters: `fill` and `stroke` (`#rrggbb` or
/// `#rrggbbaa`), `stroke-width` (pixels, default 1).
#[derive(Debug, Clone)]
pub struct StyledTileRenderer {
    max_size: u32,
}

impl StyledTileRenderer {
    pub fn new() -> Self {
        Self {
            max_size: MAX_TILE_SIZE,
        }
    }

    pub fn with_max_size(max_size: u32) -> Self {
        Self { max_size }
    }

    fn paint(&self, context: &RenderContext) -> Result<RgbaImage, RenderError> {
        let width = context.geometry.screen_width();
        let height = context.geometry.screen_height();
        if width > self.max_size || height > self.max_size {
            return Err(RenderError::TooLarge {
                width,
                height,
                max: self.max_size,
            });
        }

        let style = &context.metadata.style;
        let fill = match style.get(STYLE_FILL) {
            Some(value) => parse_color(STYLE_FILL, value)?,
            None => Rgba([0, 0, 0, 0]),
        };

        let mut image = RgbaImage::from_pixel(width, height, fill);

        if let Some(value) = style.get(STYLE_STROKE) {
            let stroke = parse_color(STYLE_STROKE, value)?;
            let stroke_width = match style.get(STYLE_STROKE_WIDTH) {
                Some(raw) => raw.parse::<u32>().map_err(|e| RenderError::InvalidStyle {
                    name: STYLE_STROKE_WIDTH.to_string(),
                    message: e.to_string(),
                })?,
                None => 1,
            };

            for (x, y, pixel) in image.enumerate_pixels_mut() {
                let on_border = x < stroke_width
                    || y < stroke_width
                    || x >= width.saturating_sub(stroke_width)
                    || y >= height.saturating_sub(stroke_width);
                if on_border {
                    *pixel = stroke;
                }
            }
        }

        Ok(image)
    }
}

impl Default for StyledTileRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderingDelegate for StyledTileRenderer {
    async fn render(&self, context: &RenderContext) -> Result<RasterizingContainer, RenderError> {
        if !context.security.can_view_layer(&context.layer.id) {
            return Err(RenderError::Forbidden {
                layer_id: context.layer.id.clone(),
            });
        }

        let image = self.paint(context)?;

        let mut output = Vec::new();
        PngEncoder::new(&mut output)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| RenderError::Encode(e.to_string()))?;

        Ok(RasterizingContainer::png(output))
    }

    fn max_tile_size(&self) -> Option<u32> {
        Some(self.max_size)
    }
}

/// Parse `#rrggbb` or `#rrggbbaa`.
fn parse_color(name: &str, value: &str) -> Result<Rgba<u8>, RenderError> {
    let invalid = |message: String| RenderError::InvalidStyle {
        name: name.to_string(),
        message,
    };

    let digits = value
        .strip_prefix('#')
        .ok_or_else(|| invalid(format!("color {value:?} must start with '#'")))?;
    let bytes = hex::decode(digits).map_err(|e| invalid(e.to_string()))?;

    match bytes.as_slice() {
        [r, g, b] => Ok(Rgba([*r, *g, *b, 255])),
        [r, g, b, a] => Ok(Rgba([*r, *g, *b, *a])),
        _ => Err(invalid(format!("color {value:?} must have 6 or 8 hex digits"))),
    }
}
