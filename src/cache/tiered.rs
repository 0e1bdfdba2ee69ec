//! The two cache tiers behind the rasterizing service.
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │  Rasterizing tier            │   │  Rebuild tier                │
//! │  rendered image bytes        │   │  JSON rebuild containers     │
//! │  large, short-lived          │   │  small, long-lived           │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!            keyed by (layer id, fingerprint) in both tiers
//! ```
//!
//! The tiers are configured and evicted independently; dropping an image
//! never touches the rebuild record that can regenerate it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::error::CacheError;

use super::disk::{DiskCache, DiskCacheConfig};
use super::memory::{EvictionPolicy, MemoryCache, MemoryCacheConfig};
use super::CacheStore;

/// Default rebuild tier entry bound.
pub const DEFAULT_REBUILD_MAX_ENTRIES: usize = 100_000;

/// Default rebuild tier byte bound: 64MB
pub const DEFAULT_REBUILD_CAPACITY: usize = 64 * 1024 * 1024;

/// The tier an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Rendered image bytes
    Rasterizing,
    /// Inputs needed to render an image again
    Rebuild,
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheCategory::Rasterizing => write!(f, "rasterizing"),
            CacheCategory::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// How a tier is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum TierConfig {
    Memory(MemoryCacheConfig),
    Disk(DiskCacheConfig),
}

impl TierConfig {
    /// Default rebuild tier: an in-memory LRU that never idles entries out.
    pub fn default_rebuild() -> Self {
        TierConfig::Memory(MemoryCacheConfig {
            max_bytes: DEFAULT_REBUILD_CAPACITY,
            max_entries: DEFAULT_REBUILD_MAX_ENTRIES,
            policy: EvictionPolicy::Lru,
            idle_timeout: None,
            max_age: None,
        })
    }

    /// Default image tier: a 100MB in-memory LRU.
    pub fn default_image() -> Self {
        TierConfig::Memory(MemoryCacheConfig::default())
    }

    /// Build the store this configuration describes.
    pub fn build(&self) -> Arc<dyn CacheStore> {
        match self {
            TierConfig::Memory(config) => Arc::new(MemoryCache::with_config(config.clone())),
            TierConfig::Disk(config) => Arc::new(DiskCache::new(config)),
        }
    }

    /// Idle or age limit of the tier, if any.
    pub fn retention(&self) -> Option<Duration> {
        match self {
            TierConfig::Memory(config) => config.max_age.or(config.idle_timeout),
            TierConfig::Disk(config) => config.max_age,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

// =============================================================================
// Two-Tier Cache
// =============================================================================

struct Tier {
    store: Arc<dyn CacheStore>,
    stats: CacheStats,
}

impl Tier {
    fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            stats: CacheStats::default(),
        }
    }
}

/// Image tier plus rebuild tier, addressed by [`CacheCategory`].
pub struct TwoTierCache {
    rasterizing: Tier,
    rebuild: Tier,
}

impl TwoTierCache {
    pub fn new(rasterizing: Arc<dyn CacheStore>, rebuild: Arc<dyn CacheStore>) -> Self {
        Self {
            rasterizing: Tier::new(rasterizing),
            rebuild: Tier::new(rebuild),
        }
    }

    pub fn from_config(rasterizing: &TierConfig, rebuild: &TierConfig) -> Self {
        Self::new(rasterizing.build(), rebuild.build())
    }

    /// Both tiers in memory with default bounds.
    pub fn in_memory() -> Self {
        Self::from_config(&TierConfig::default_image(), &TierConfig::default_rebuild())
    }

    fn tier(&self, category: CacheCategory) -> &Tier {
        match category {
            CacheCategory::Rasterizing => &self.rasterizing,
            CacheCategory::Rebuild => &self.rebuild,
        }
    }

    /// The store backing a tier.
    pub fn store(&self, category: CacheCategory) -> &Arc<dyn CacheStore> {
        &self.tier(category).store
    }

    pub async fn get(
        &self,
        category: CacheCategory,
        layer_id: &str,
        key: &str,
    ) -> Result<Option<Bytes>, CacheError> {
        let tier = self.tier(category);
        match tier.store.get(layer_id, key).await {
            Ok(Some(value)) => {
                tier.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Ok(None) => {
                tier.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                tier.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn put(
        &self,
        category: CacheCategory,
        layer_id: &str,
        key: &str,
        value: Bytes,
    ) -> Result<(), CacheError> {
        let tier = self.tier(category);
        let result = tier.store.put(layer_id, key, value).await;
        match result {
            Ok(()) => tier.stats.writes.fetch_add(1, Ordering::Relaxed),
            Err(_) => tier.stats.errors.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    pub async fn remove(
        &self,
        category: CacheCategory,
        layer_id: &str,
        key: &str,
    ) -> Result<bool, CacheError> {
        self.tier(category).store.remove(layer_id, key).await
    }

    pub async fn clear(&self, category: CacheCategory) -> Result<(), CacheError> {
        self.tier(category).store.clear().await
    }

    pub async fn len(&self, category: CacheCategory) -> Result<usize, CacheError> {
        self.tier(category).store.len().await
    }

    pub fn stats(&self, category: CacheCategory) -> CacheStatsSnapshot {
        self.tier(category).stats.snapshot()
    }
}

impl Default for TwoTierCache {
    fn default() -> Self {
        Self::in_memory()
    }
}
