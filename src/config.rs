//! Configuration management.
//!
//! Settings come from command-line arguments (clap) with environment variable
//! fallbacks using the `RASTER_` prefix:
//!
//! - `RASTER_HOST` - Server bind address (default: 0.0.0.0)
//! - `RASTER_PORT` - Server port (default: 3000)
//! - `RASTER_LAYERS` - Layer catalog JSON file (default: built-in `osm` layer)
//! - `RASTER_IMAGE_CACHE_BYTES` - Image tier byte bound (default: 100MB)
//! - `RASTER_IMAGE_CACHE_ENTRIES` - Image tier entry bound (default: 10000)
//! - `RASTER_IMAGE_CACHE_IDLE` - Image tier idle timeout in seconds
//! - `RASTER_IMAGE_CACHE_POLICY` - `lru`, `fifo` or `none` (default: lru)
//! - `RASTER_REBUILD_BACKEND` - `memory` or `disk` (default: memory)
//! - `RASTER_REBUILD_DIR` - Disk rebuild tier root (default: `${RASTER_CACHE_DIR}/rebuild`)
//! - `RASTER_REBUILD_MAX_AGE` - Rebuild record max age in seconds
//! - `RASTER_SINGLE_FLIGHT` - De-duplicate concurrent rebuilds (default: false)
//! - `RASTER_TILE_URLS` - Comma-separated public tile base URLs
//! - `RASTER_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{
    resolve_cache_dir, DiskCacheConfig, EvictionPolicy, MemoryCacheConfig, TierConfig,
    DEFAULT_MAX_ENTRIES, DEFAULT_MEMORY_CAPACITY, DEFAULT_REBUILD_CAPACITY,
    DEFAULT_REBUILD_MAX_ENTRIES,
};
use crate::error::ConfigError;
use crate::layer::LayerCatalog;
use crate::tile::{RoundRobinUrlBuilder, DEFAULT_EXTENSION};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default root of the disk rebuild tier.
pub const DEFAULT_REBUILD_DIR: &str = "${RASTER_CACHE_DIR}/rebuild";

/// Default number of URLs printed by the `url` command.
pub const DEFAULT_URL_COUNT: usize = 3;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rasterizing cache - a map tile server that re-renders evicted tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "rasterizing-cache")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The command to run; `serve` when none was named.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the tile server
    Serve(ServeConfig),

    /// Print round-robin URLs for a tile
    Url(UrlConfig),

    /// Check the layer catalog and cache directory
    Check(CheckConfig),
}

/// Storage of the rebuild tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RebuildBackend {
    #[default]
    Memory,
    Disk,
}

// =============================================================================
// Serve Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "RASTER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "RASTER_PORT")]
    pub port: u16,

    /// Layer catalog JSON file.
    ///
    /// If not specified, a single Web Mercator layer named `osm` is served.
    #[arg(long, env = "RASTER_LAYERS")]
    pub layers: Option<PathBuf>,

    // =========================================================================
    // Image Tier
    // =========================================================================
    /// Maximum total size of cached images in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CAPACITY, env = "RASTER_IMAGE_CACHE_BYTES")]
    pub image_cache_bytes: usize,

    /// Maximum number of cached images.
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, env = "RASTER_IMAGE_CACHE_ENTRIES")]
    pub image_cache_entries: usize,

    /// Drop images not read for this many seconds.
    #[arg(long, env = "RASTER_IMAGE_CACHE_IDLE")]
    pub image_cache_idle: Option<u64>,

    /// Eviction policy of the image tier.
    #[arg(long, value_enum, default_value_t = EvictionPolicy::Lru, env = "RASTER_IMAGE_CACHE_POLICY")]
    pub image_cache_policy: EvictionPolicy,

    // =========================================================================
    // Rebuild Tier
    // =========================================================================
    /// Where rebuild records are kept.
    #[arg(long, value_enum, default_value_t = RebuildBackend::Memory, env = "RASTER_REBUILD_BACKEND")]
    pub rebuild_backend: RebuildBackend,

    /// Root directory of the disk rebuild tier; may start with `${NAME}`.
    #[arg(long, default_value = DEFAULT_REBUILD_DIR, env = "RASTER_REBUILD_DIR")]
    pub rebuild_dir: String,

    /// Maximum number of rebuild records kept in memory.
    #[arg(long, default_value_t = DEFAULT_REBUILD_MAX_ENTRIES, env = "RASTER_REBUILD_ENTRIES")]
    pub rebuild_entries: usize,

    /// Maximum total size of in-memory rebuild records in bytes.
    #[arg(long, default_value_t = DEFAULT_REBUILD_CAPACITY, env = "RASTER_REBUILD_BYTES")]
    pub rebuild_bytes: usize,

    /// Forget rebuild records this many seconds after they were written,
    /// whether or not they were read since.
    #[arg(long, env = "RASTER_REBUILD_MAX_AGE")]
    pub rebuild_max_age: Option<u64>,

    /// Render each missing tile only once when requested concurrently.
    #[arg(long, default_value_t = false, env = "RASTER_SINGLE_FLIGHT")]
    pub single_flight: bool,

    // =========================================================================
    // Tile URLs
    // =========================================================================
    /// Public tile base URLs (comma-separated), rotated round-robin.
    ///
    /// If not specified, the a/b/c OpenStreetMap tile servers are used.
    #[arg(long, env = "RASTER_TILE_URLS", value_delimiter = ',')]
    pub tile_urls: Option<Vec<String>>,

    /// File extension of public tile URLs.
    #[arg(long, default_value = DEFAULT_EXTENSION, env = "RASTER_TILE_EXTENSION")]
    pub tile_extension: String,

    // =========================================================================
    // HTTP
    // =========================================================================
    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "RASTER_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "RASTER_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.image_cache_bytes == 0 {
            return Err("image_cache_bytes must be greater than 0".to_string());
        }
        if self.image_cache_entries == 0 {
            return Err("image_cache_entries must be greater than 0".to_string());
        }
        if self.rebuild_entries == 0 || self.rebuild_bytes == 0 {
            return Err("rebuild cache bounds must be greater than 0".to_string());
        }
        if self.image_cache_idle == Some(0) {
            return Err("image_cache_idle must be greater than 0 when set".to_string());
        }
        if self.rebuild_backend == RebuildBackend::Disk && self.rebuild_dir.trim().is_empty() {
            return Err(
                "A rebuild directory is required for the disk backend. \
                 Set --rebuild-dir or RASTER_REBUILD_DIR"
                    .to_string(),
            );
        }
        if let Some(urls) = &self.tile_urls {
            if urls.iter().all(|u| u.trim().is_empty()) {
                return Err("tile_urls must contain at least one URL".to_string());
            }
        }
        if self.tile_extension.is_empty() {
            return Err("tile_extension must not be empty".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn image_tier(&self) -> TierConfig {
        TierConfig::Memory(MemoryCacheConfig {
            max_bytes: self.image_cache_bytes,
            max_entries: self.image_cache_entries,
            policy: self.image_cache_policy,
            idle_timeout: self.image_cache_idle.map(Duration::from_secs),
            max_age: None,
        })
    }

    pub fn rebuild_tier(&self) -> TierConfig {
        let max_age = self.rebuild_max_age.map(Duration::from_secs);
        match self.rebuild_backend {
            RebuildBackend::Memory => TierConfig::Memory(MemoryCacheConfig {
                max_bytes: self.rebuild_bytes,
                max_entries: self.rebuild_entries,
                policy: EvictionPolicy::Lru,
                idle_timeout: None,
                max_age,
            }),
            RebuildBackend::Disk => TierConfig::Disk(DiskCacheConfig {
                dir: self.rebuild_dir.clone(),
                max_age,
            }),
        }
    }

    pub fn url_builder(&self) -> Result<RoundRobinUrlBuilder, ConfigError> {
        build_url_builder(self.tile_urls.as_deref(), &self.tile_extension)
    }

    pub fn load_layers(&self) -> Result<LayerCatalog, ConfigError> {
        load_layers(self.layers.as_ref())
    }
}

// =============================================================================
// Url Command
// =============================================================================

#[derive(Args, Debug, Clone)]
#[command(allow_negative_numbers = true)]
pub struct UrlConfig {
    /// Zoom level of the tile.
    pub level: u32,

    /// Tile column.
    pub x: i32,

    /// Tile row.
    pub y: i32,

    /// Number of URLs to print.
    #[arg(short = 'n', long, default_value_t = DEFAULT_URL_COUNT)]
    pub count: usize,

    /// Tile base URLs (comma-separated).
    #[arg(long, env = "RASTER_TILE_URLS", value_delimiter = ',')]
    pub tile_urls: Option<Vec<String>>,

    /// File extension of tile URLs.
    #[arg(long, default_value = DEFAULT_EXTENSION, env = "RASTER_TILE_EXTENSION")]
    pub tile_extension: String,
}

impl UrlConfig {
    pub fn url_builder(&self) -> Result<RoundRobinUrlBuilder, ConfigError> {
        build_url_builder(self.tile_urls.as_deref(), &self.tile_extension)
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Layer catalog JSON file.
    #[arg(long, env = "RASTER_LAYERS")]
    pub layers: Option<PathBuf>,

    /// Rebuild directory to test; may start with `${NAME}`.
    #[arg(long, default_value = DEFAULT_REBUILD_DIR, env = "RASTER_REBUILD_DIR")]
    pub rebuild_dir: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn resolved_rebuild_dir(&self) -> PathBuf {
        resolve_cache_dir(&self.rebuild_dir)
    }

    pub fn load_layers(&self) -> Result<LayerCatalog, ConfigError> {
        load_layers(self.layers.as_ref())
    }
}

fn build_url_builder(
    urls: Option<&[String]>,
    extension: &str,
) -> Result<RoundRobinUrlBuilder, ConfigError> {
    match urls {
        Some(urls) => RoundRobinUrlBuilder::new(
            urls.iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
            extension,
        ),
        None => {
            let defaults = RoundRobinUrlBuilder::default();
            RoundRobinUrlBuilder::new(defaults.base_urls().to_vec(), extension)
        }
    }
}

fn load_layers(path: Option<&PathBuf>) -> Result<LayerCatalog, ConfigError> {
    match path {
        Some(path) => LayerCatalog::from_json_file(path),
        None => Ok(LayerCatalog::default_catalog()),
    }
}

// =============================================================================
// Tests
// =============================================================================
