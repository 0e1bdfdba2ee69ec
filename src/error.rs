use thiserror::Error;

/// Errors raised by a cache tier.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Backing store could not be reached (memory poisoned, disk unreadable)
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The cache directory could not be created
    #[error("Could not create cache directory {path}: {message}")]
    DirectoryCreation { path: String, message: String },

    /// A stored entry could not be decoded
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// A value could not be serialized for storage
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Errors from tile geometry calculation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Extent (or the computed tile size) has zero width or height
    #[error("Degenerate extent: tile size is {width} x {height}")]
    DegenerateExtent { width: f64, height: f64 },

    /// Scale must be finite and strictly positive
    #[error("Invalid scale: {0}")]
    InvalidScale(f64),

    /// Super tiles have no place in the grid
    #[error("Super tile at level {level} has no grid bounds")]
    SuperTile { level: u32 },

    /// Negative column or row other than the super tile sentinel
    #[error("Tile {x},{y} is not a grid cell")]
    NotGridCell { x: i32, y: i32 },
}

/// Errors raised by a rendering delegate.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The security snapshot does not grant access to the layer
    #[error("Access to layer {layer_id} is not authorized")]
    Forbidden { layer_id: String },

    /// A style parameter could not be interpreted
    #[error("Invalid style parameter {name}: {message}")]
    InvalidStyle { name: String, message: String },

    /// Requested raster is larger than the renderer allows
    #[error("Tile of {width} x {height} pixels exceeds the {max} pixel limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    /// Image encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Any failure of the data source behind the renderer
    #[error("Rendering backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the rasterizing service.
#[derive(Debug, Clone, Error)]
pub enum RasterizeError {
    /// Neither tier knows the fingerprint; never retried automatically
    #[error("No rebuild data for {key} on layer {layer_id}")]
    RebuildDataMissing { layer_id: String, key: String },

    /// The rendering delegate failed; the failure is not cached
    #[error("Rendering {key} failed: {source}")]
    Render {
        key: String,
        #[source]
        source: RenderError,
    },

    /// Layer is not part of the catalog
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    /// Tile geometry could not be computed
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Rebuild tier could not be read or written
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Errors loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File content is not valid
    #[error("Invalid configuration in {path}: {message}")]
    Invalid { path: String, message: String },

    /// URL builder needs at least one base URL
    #[error("At least one tile base URL is required")]
    NoBaseUrls,
}
