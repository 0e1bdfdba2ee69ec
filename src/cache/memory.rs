//! In-memory cache tier.
//!
//! Entries are bounded by count and by total byte size. Which entry goes
//! first is decided by the [`EvictionPolicy`]:
//!
//! - `Lru`: reads refresh an entry's position
//! - `Fifo`: reads leave the insertion order alone
//! - `None`: nothing is ever evicted for capacity reasons
//!
//! An optional idle timeout drops entries that have not been read or written
//! for longer than the timeout. An optional maximum age drops entries a fixed
//! time after they were written, however often they are read.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CacheError;

use super::CacheStore;

/// Default byte capacity: 100MB
pub const DEFAULT_MEMORY_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Which entry to drop when the cache is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Never evict for capacity
    None,
    /// Evict the oldest insertion
    Fifo,
    /// Evict the least recently used
    #[default]
    Lru,
}

/// Settings for a [`MemoryCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCacheConfig {
    /// Maximum total size of cached values in bytes
    pub max_bytes: usize,

    /// Maximum number of entries
    pub max_entries: usize,

    pub policy: EvictionPolicy,

    /// Entries idle for longer than this are dropped
    pub idle_timeout: Option<Duration>,

    /// Entries written longer ago than this are dropped
    pub max_age: Option<Duration>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MEMORY_CAPACITY,
            max_entries: DEFAULT_MAX_ENTRIES,
            policy: EvictionPolicy::Lru,
            idle_timeout: None,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    layer_id: Arc<str>,
    key: Arc<str>,
}

impl EntryKey {
    fn new(layer_id: &str, key: &str) -> Self {
        Self {
            layer_id: layer_id.into(),
            key: key.into(),
        }
    }
}

struct Entry {
    data: Bytes,
    inserted: Instant,
    last_access: Instant,
}

struct Inner {
    entries: LruCache<EntryKey, Entry>,
    current_size: usize,
}

/// Bounded in-memory store, safe for concurrent use through `Arc`.
pub struct MemoryCache {
    inner: RwLock<Inner>,
    config: MemoryCacheConfig,
}

impl MemoryCache {
    /// Create a cache with default settings (LRU, 100MB, 10k entries).
    pub fn new() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }

    pub fn with_config(config: MemoryCacheConfig) -> Self {
        let entries = match config.policy {
            EvictionPolicy::None => LruCache::unbounded(),
            _ => LruCache::new(NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN)),
        };
        Self {
            inner: RwLock::new(Inner {
                entries,
                current_size: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Total size of cached values in bytes.
    pub async fn size(&self) -> usize {
        self.inner.read().await.current_size
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        let idle = self
            .config
            .idle_timeout
            .is_some_and(|idle| now.duration_since(entry.last_access) > idle);
        let aged = self
            .config
            .max_age
            .is_some_and(|age| now.duration_since(entry.inserted) > age);
        idle || aged
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, layer_id: &str, key: &str) -> Result<Option<Bytes>, CacheError> {
        let entry_key = EntryKey::new(layer_id, key);
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        let expired = match inner.entries.peek(&entry_key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            if let Some(expired) = inner.entries.pop(&entry_key) {
                inner.current_size = inner.current_size.saturating_sub(expired.data.len());
            }
            return Ok(None);
        }

        let entry = match self.config.policy {
            EvictionPolicy::Lru => inner.entries.get_mut(&entry_key),
            _ => inner.entries.peek_mut(&entry_key),
        };
        Ok(entry.map(|entry| {
            entry.last_access = now;
            entry.data.clone()
        }))
    }

    async fn put(&self, layer_id: &str, key: &str, value: Bytes) -> Result<(), CacheError> {
        let entry_key = EntryKey::new(layer_id, key);
        let value_size = value.len();
        let mut inner = self.inner.write().await;

        if let Some(old) = inner.entries.peek(&entry_key) {
            let old_size = old.data.len();
            inner.current_size = inner.current_size.saturating_sub(old_size);
        }

        // `push` hands back whatever the entry bound pushed out (or the old value).
        let now = Instant::now();
        let displaced = inner.entries.push(
            entry_key.clone(),
            Entry {
                data: value,
                inserted: now,
                last_access: now,
            },
        );
        if let Some((displaced_key, displaced)) = displaced {
            if displaced_key != entry_key {
                inner.current_size = inner.current_size.saturating_sub(displaced.data.len());
            }
        }
        inner.current_size += value_size;

        if self.config.policy != EvictionPolicy::None {
            while inner.current_size > self.config.max_bytes {
                match inner.entries.pop_lru() {
                    Some((_, evicted)) => {
                        inner.current_size = inner.current_size.saturating_sub(evicted.data.len());
                    }
                    None => break,
                }
            }
        }

        Ok(())
    }

    async fn remove(&self, layer_id: &str, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.write().await;
        match inner.entries.pop(&EntryKey::new(layer_id, key)) {
            Some(entry) => {
                inner.current_size = inner.current_size.saturating_sub(entry.data.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.current_size = 0;
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.inner.read().await.entries.len())
    }
}
