//! Cache tiers.
//!
//! Every tier implements [`CacheStore`], a small key-value interface scoped by
//! layer id. Two implementations are provided:
//!
//! - [`MemoryCache`]: bounded in-process store with LRU/FIFO/no eviction
//! - [`DiskCache`]: one file per entry, survives restarts
//!
//! [`TwoTierCache`] pairs an image tier with a rebuild tier.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use rasterizing_cache::cache::{CacheCategory, TwoTierCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = TwoTierCache::in_memory();
//!
//!     cache
//!         .put(CacheCategory::Rasterizing, "osm", "fingerprint", Bytes::from_static(b"png"))
//!         .await
//!         .unwrap();
//!
//!     let hit = cache.get(CacheCategory::Rasterizing, "osm", "fingerprint").await.unwrap();
//!     assert!(hit.is_some());
//! }
//! ```

mod disk;
mod memory;
mod tiered;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheError;

pub use disk::{ensure_dir, resolve_cache_dir, DiskCache, DiskCacheConfig, FALLBACK_CACHE_SUBDIR};
pub use memory::{
    EvictionPolicy, MemoryCache, MemoryCacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_MEMORY_CAPACITY,
};
pub use tiered::{
    CacheCategory, CacheStatsSnapshot, TierConfig, TwoTierCache, DEFAULT_REBUILD_CAPACITY,
    DEFAULT_REBUILD_MAX_ENTRIES,
};

/// Key-value store for one cache tier.
///
/// Implementations must be safe for concurrent `get`/`put` from many tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, layer_id: &str, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Insert or replace an entry.
    async fn put(&self, layer_id: &str, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, layer_id: &str, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}
