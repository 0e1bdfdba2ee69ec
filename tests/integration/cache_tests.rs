//! Cache tier integration tests.
//!
//! Tests verify:
//! - Disk entries persist across store instances
//! - Disk layout keeps layers apart
//! - Placeholder resolution of cache directories
//! - Eviction policies of the memory tier
//! - Tier configuration wiring

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use rasterizing_cache::cache::{
    resolve_cache_dir, CacheCategory, CacheStore, DiskCache, DiskCacheConfig, EvictionPolicy,
    MemoryCache, MemoryCacheConfig, TierConfig, TwoTierCache, FALLBACK_CACHE_SUBDIR,
};

fn disk_config(dir: &tempfile::TempDir) -> DiskCacheConfig {
    DiskCacheConfig {
        dir: dir.path().display().to_string(),
        max_age: None,
    }
}

// =============================================================================
// Disk Tier
// =============================================================================

#[tokio::test]
async fn test_disk_entries_persist_across_instances() {
    let dir = tempfile::tempdir().unwrap();

    let first = DiskCache::new(&disk_config(&dir));
    first
        .put("osm", "abc", Bytes::from_static(b"record"))
        .await
        .unwrap();
    drop(first);

    let second = DiskCache::new(&disk_config(&dir));
    assert_eq!(
        second.get("osm", "abc").await.unwrap(),
        Some(Bytes::from_static(b"record"))
    );
    assert_eq!(second.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_disk_layers_are_separate() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(&disk_config(&dir));

    cache.put("roads", "k", Bytes::from_static(b"r")).await.unwrap();
    cache.put("parcels", "k", Bytes::from_static(b"p")).await.unwrap();

    assert_eq!(cache.get("roads", "k").await.unwrap().unwrap(), "r");
    assert_eq!(cache.get("parcels", "k").await.unwrap().unwrap(), "p");

    assert!(cache.remove("roads", "k").await.unwrap());
    assert!(!cache.remove("roads", "k").await.unwrap());
    assert!(cache.get("parcels", "k").await.unwrap().is_some());
}

#[tokio::test]
async fn test_disk_layer_ids_with_path_characters() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(&disk_config(&dir));

    cache
        .put("../escape", "../../key", Bytes::from_static(b"x"))
        .await
        .unwrap();

    assert!(cache.get("../escape", "../../key").await.unwrap().is_some());
    // Nothing was written outside the root.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_disk_max_age() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(&DiskCacheConfig {
        dir: dir.path().display().to_string(),
        max_age: Some(Duration::from_millis(50)),
    });

    cache.put("osm", "k", Bytes::from_static(b"x")).await.unwrap();
    assert!(cache.get("osm", "k").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache.get("osm", "k").await.unwrap().is_none());
}

#[test]
fn test_placeholder_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let name = "RASTERIZING_CACHE_TEST_DIR_7F3A";
    std::env::set_var(name, dir.path());

    let resolved = resolve_cache_dir(&format!("${{{}}}/rebuild", name));
    assert_eq!(resolved, dir.path().join("rebuild"));

    std::env::remove_var(name);
    let resolved = resolve_cache_dir(&format!("${{{}}}/rebuild", name));
    assert_eq!(
        resolved,
        std::env::temp_dir().join(FALLBACK_CACHE_SUBDIR).join("rebuild")
    );

    assert_eq!(
        resolve_cache_dir("/var/cache/tiles"),
        std::path::PathBuf::from("/var/cache/tiles")
    );
}

// =============================================================================
// Memory Tier
// =============================================================================

fn memory(policy: EvictionPolicy, max_bytes: usize) -> MemoryCache {
    MemoryCache::with_config(MemoryCacheConfig {
        max_bytes,
        max_entries: 100,
        policy,
        idle_timeout: None,
        max_age: None,
    })
}

#[tokio::test]
async fn test_lru_keeps_recently_read_entry() {
    let cache = memory(EvictionPolicy::Lru, 20);

    cache.put("l", "a", Bytes::from(vec![0u8; 10])).await.unwrap();
    cache.put("l", "b", Bytes::from(vec![0u8; 10])).await.unwrap();
    cache.get("l", "a").await.unwrap();
    cache.put("l", "c", Bytes::from(vec![0u8; 10])).await.unwrap();

    assert!(cache.get("l", "a").await.unwrap().is_some());
    assert!(cache.get("l", "b").await.unwrap().is_none());
    assert!(cache.get("l", "c").await.unwrap().is_some());
}

#[tokio::test]
async fn test_fifo_ignores_reads() {
    let cache = memory(EvictionPolicy::Fifo, 20);

    cache.put("l", "a", Bytes::from(vec![0u8; 10])).await.unwrap();
    cache.put("l", "b", Bytes::from(vec![0u8; 10])).await.unwrap();
    cache.get("l", "a").await.unwrap();
    cache.put("l", "c", Bytes::from(vec![0u8; 10])).await.unwrap();

    assert!(cache.get("l", "a").await.unwrap().is_none());
    assert!(cache.get("l", "b").await.unwrap().is_some());
}

#[tokio::test]
async fn test_policy_none_never_evicts_for_size() {
    let cache = memory(EvictionPolicy::None, 10);

    for key in ["a", "b", "c", "d"] {
        cache.put("l", key, Bytes::from(vec![0u8; 10])).await.unwrap();
    }
    assert_eq!(cache.len().await.unwrap(), 4);
}

#[tokio::test]
async fn test_idle_entries_expire() {
    let cache = MemoryCache::with_config(MemoryCacheConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..MemoryCacheConfig::default()
    });

    cache.put("l", "k", Bytes::from_static(b"x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cache.get("l", "k").await.unwrap().is_none());
}

// =============================================================================
// Two Tiers
// =============================================================================

#[tokio::test]
async fn test_tiers_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let rebuild = TierConfig::Disk(disk_config(&dir));
    let cache = TwoTierCache::from_config(&TierConfig::default_image(), &rebuild);

    assert_eq!(cache.store(CacheCategory::Rasterizing).name(), "memory");
    assert_eq!(cache.store(CacheCategory::Rebuild).name(), "disk");

    cache
        .put(CacheCategory::Rebuild, "osm", "k", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    cache.clear(CacheCategory::Rebuild).await.unwrap();
    assert_eq!(cache.len(CacheCategory::Rebuild).await.unwrap(), 0);
}

#[tokio::test]
async fn test_shared_store_across_caches() {
    let rebuild: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let first = TwoTierCache::new(Arc::new(MemoryCache::new()), Arc::clone(&rebuild));
    let second = TwoTierCache::new(Arc::new(MemoryCache::new()), Arc::clone(&rebuild));

    first
        .put(CacheCategory::Rebuild, "osm", "k", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert!(second
        .get(CacheCategory::Rebuild, "osm", "k")
        .await
        .unwrap()
        .is_some());
    assert_eq!(second.stats(CacheCategory::Rebuild).hits, 1);
    assert_eq!(first.stats(CacheCategory::Rebuild).writes, 1);
}
