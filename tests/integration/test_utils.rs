//! Test utilities for integration tests.
//!
//! Provides mock rendering delegates that record how often they run, a cache
//! tier that can be switched into failure, a small layer catalog and request
//! helpers for the router.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use axum::http::{header, Request};
use axum::Router;

use rasterizing_cache::cache::{CacheStore, MemoryCache};
use rasterizing_cache::error::{CacheError, RenderError};
use rasterizing_cache::layer::{LayerCatalog, LayerInfo};
use rasterizing_cache::rasterizing::{
    RasterizingContainer, RasterizingService, RenderContext, RenderingDelegate,
};
use rasterizing_cache::tile::{Envelope, RoundRobinUrlBuilder};
use rasterizing_cache::{create_router, RouterConfig, TwoTierCache};

/// Layer used by most tests: a 256 x 256 world.
pub const TEST_LAYER: &str = "roads";

// =============================================================================
// Mock Rendering Delegate
// =============================================================================

/// A delegate that renders `"{layer}:{tile}"` as the image bytes and counts
/// invocations.
///
/// Clones share the counter and the failure switch, so a clone can be kept
/// by the test while the original is moved into the service.
#[derive(Clone, Default)]
pub struct CountingDelegate {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl CountingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every render.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make subsequent renders fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderingDelegate for CountingDelegate {
    async fn render(&self, context: &RenderContext) -> Result<RasterizingContainer, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(RenderError::Backend("datastore offline".to_string()));
        }

        Ok(RasterizingContainer::png(format!(
            "{}:{}",
            context.layer.id, context.metadata.code
        )))
    }
}

// =============================================================================
// Failing Cache Tier
// =============================================================================

/// A memory tier whose reads and writes can be made to fail with
/// [`CacheError::Unavailable`].
///
/// Clones share the entries and both switches.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryCache>,
    failing_reads: Arc<AtomicBool>,
    failing_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    fn check(switch: &AtomicBool) -> Result<(), CacheError> {
        if switch.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, layer_id: &str, key: &str) -> Result<Option<Bytes>, CacheError> {
        Self::check(&self.failing_reads)?;
        self.inner.get(layer_id, key).await
    }

    async fn put(&self, layer_id: &str, key: &str, value: Bytes) -> Result<(), CacheError> {
        Self::check(&self.failing_writes)?;
        self.inner.put(layer_id, key, value).await
    }

    async fn remove(&self, layer_id: &str, key: &str) -> Result<bool, CacheError> {
        self.inner.remove(layer_id, key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }

    async fn len(&self) -> Result<usize, CacheError> {
        self.inner.len().await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn test_catalog() -> LayerCatalog {
    LayerCatalog::new([
        LayerInfo {
            id: TEST_LAYER.to_string(),
            crs: "EPSG:4326".to_string(),
            max_extent: Envelope::new(0.0, 0.0, 256.0, 256.0),
        },
        LayerInfo {
            id: "parcels".to_string(),
            crs: "EPSG:28992".to_string(),
            max_extent: Envelope::new(0.0, 300_000.0, 280_000.0, 625_000.0),
        },
    ])
}

/// Service over in-memory tiers; the cache handle stays with the caller.
pub fn test_service<D: RenderingDelegate>(
    delegate: D,
) -> (RasterizingService<D>, Arc<TwoTierCache>) {
    let cache = Arc::new(TwoTierCache::in_memory());
    let service = RasterizingService::with_shared(
        Arc::clone(&cache),
        Arc::new(delegate),
        Arc::new(test_catalog()),
    );
    (service, cache)
}

/// Service over two [`FlakyStore`] tiers (image, rebuild) kept by the caller.
pub fn flaky_service<D: RenderingDelegate>(
    delegate: D,
    image: &FlakyStore,
    rebuild: &FlakyStore,
) -> RasterizingService<D> {
    RasterizingService::new(
        TwoTierCache::new(Arc::new(image.clone()), Arc::new(rebuild.clone())),
        delegate,
        test_catalog(),
    )
}

pub fn test_router<D: RenderingDelegate + 'static>(service: RasterizingService<D>) -> Router {
    create_router(
        service,
        RoundRobinUrlBuilder::default(),
        RouterConfig::new().with_tracing(false),
    )
}

// =============================================================================
// Requests
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    post_json_with_headers(uri, body, &[])
}

pub fn post_json_with_headers(
    uri: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Check for the PNG file signature.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}
