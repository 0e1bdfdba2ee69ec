//! Rasterizing service: image cache lookups with rebuild on miss.
//!
//! ```text
//!  get(layer, key)
//!       │
//!       ▼
//!  image tier ──hit──────────────────────────────────────▶ ImageHit
//!       │ miss
//!       ▼
//!  rebuild tier ──miss───────────────────────────────────▶ RebuildDataMissing
//!       │ hit
//!       ▼
//!  RenderContext (layer, geometry, bounds, security)
//!       │
//!       ▼
//!  RenderingDelegate ──error─────────────────────────────▶ Render (not cached)
//!       │ ok
//!       ▼
//!  store in image tier ──────────────────────────────────▶ Rebuilt
//! ```
//!
//! Rebuild records are written only by [`RasterizingService::prepare`]; the
//! lookup path never writes or removes them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheCategory, CacheStatsSnapshot, TwoTierCache};
use crate::error::{CacheError, RasterizeError, RenderError};
use crate::layer::LayerCatalog;
use crate::tile::TileGeometry;

use super::delegate::{RenderContext, RenderingDelegate};
use super::types::{
    fingerprint, rasterizing_path, PreparedTile, RasterizingContainer, RebuildCacheContainer,
    SecurityContext, TileMetadata,
};

// =============================================================================
// Responses
// =============================================================================

/// How a successful lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served straight from the image tier
    ImageHit,
    /// Rendered again from the rebuild record and stored in the image tier
    Rebuilt,
}

/// A tile image returned by [`RasterizingService::get`].
#[derive(Debug, Clone)]
pub struct RasterizingResponse {
    pub container: RasterizingContainer,
    pub outcome: CacheOutcome,
}

impl RasterizingResponse {
    pub fn cache_hit(&self) -> bool {
        self.outcome == CacheOutcome::ImageHit
    }
}

/// Counters of both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ServiceStats {
    pub rasterizing: CacheStatsSnapshot,
    pub rebuild: CacheStatsSnapshot,
}

// =============================================================================
// Single Flight
// =============================================================================

type FlightKey = (String, String);

/// Tracks which fingerprints are being rebuilt right now.
#[derive(Default)]
struct InFlight {
    flights: Mutex<HashMap<FlightKey, Arc<Notify>>>,
}

/// Removes the flight and wakes waiters when the leader finishes or is dropped.
struct FlightGuard<'a> {
    in_flight: &'a InFlight,
    key: FlightKey,
    notify: Arc<Notify>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.notify.notify_waiters();
    }
}

// =============================================================================
// Rasterizing Service
// =============================================================================

/// Serves rendered tiles and rebuilds them when the image tier lost them.
///
/// Concurrent misses for the same fingerprint each render independently
/// unless single flight is enabled with [`RasterizingService::with_single_flight`].
pub struct RasterizingService<D: RenderingDelegate> {
    cache: Arc<TwoTierCache>,
    delegate: Arc<D>,
    layers: Arc<LayerCatalog>,
    in_flight: Option<InFlight>,
}

impl<D: RenderingDelegate> RasterizingService<D> {
    pub fn new(cache: TwoTierCache, delegate: D, layers: LayerCatalog) -> Self {
        Self::with_shared(Arc::new(cache), Arc::new(delegate), Arc::new(layers))
    }

    /// Create a service over shared components.
    pub fn with_shared(
        cache: Arc<TwoTierCache>,
        delegate: Arc<D>,
        layers: Arc<LayerCatalog>,
    ) -> Self {
        Self {
            cache,
            delegate,
            layers,
            in_flight: None,
        }
    }

    /// Let only one task render a given fingerprint at a time; the others
    /// wait for its result.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(InFlight::default);
        self
    }

    pub fn single_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    pub fn layers(&self) -> &Arc<LayerCatalog> {
        &self.layers
    }

    pub fn delegate(&self) -> &Arc<D> {
        &self.delegate
    }

    /// Register a render request and return where its image can be fetched.
    ///
    /// Validates the layer and the tile geometry, then stores the rebuild
    /// record under the request's fingerprint. Nothing is rendered here; the
    /// first [`get`](Self::get) for the key renders the image.
    ///
    /// Tiles larger than the delegate's [`max_tile_size`] are refused with
    /// [`RenderError::TooLarge`] and leave no record behind.
    ///
    /// [`max_tile_size`]: RenderingDelegate::max_tile_size
    pub async fn prepare(
        &self,
        metadata: TileMetadata,
        security: SecurityContext,
    ) -> Result<PreparedTile, RasterizeError> {
        let context = self.build_context(metadata, security)?;
        let key = fingerprint(&context.metadata, &context.security);
        let layer_id = context.metadata.layer_id.clone();

        if let Some(max) = self.delegate.max_tile_size() {
            let width = context.geometry.screen_width();
            let height = context.geometry.screen_height();
            if width > max || height > max {
                debug!(layer_id = %layer_id, width, height, max, "Refusing oversized tile");
                return Err(RasterizeError::Render {
                    key,
                    source: RenderError::TooLarge { width, height, max },
                });
            }
        }

        let container = RebuildCacheContainer {
            metadata: context.metadata,
            security: context.security,
        };
        self.cache
            .put(CacheCategory::Rebuild, &layer_id, &key, container.to_bytes()?)
            .await?;

        debug!(
            layer_id = %layer_id,
            key = %key,
            tile = %container.metadata.code,
            "Stored rebuild record"
        );

        Ok(PreparedTile {
            url: rasterizing_path(&layer_id, &key),
            layer_id,
            code: container.metadata.code,
            key,
            bounds: context.bounds,
            screen_width: context.geometry.screen_width(),
            screen_height: context.geometry.screen_height(),
        })
    }

    /// Fetch a tile image, rendering it again from its rebuild record if the
    /// image tier no longer holds it.
    ///
    /// # Errors
    ///
    /// - [`RasterizeError::RebuildDataMissing`] when neither tier knows the key
    /// - [`RasterizeError::Render`] when the delegate fails
    /// - [`RasterizeError::Cache`] when the rebuild tier cannot be read
    pub async fn get(
        &self,
        layer_id: &str,
        key: &str,
    ) -> Result<RasterizingResponse, RasterizeError> {
        if let Some(container) = self.lookup_image(layer_id, key).await {
            debug!(layer_id, key, state = "image_hit", "Tile served from image cache");
            return Ok(RasterizingResponse {
                container,
                outcome: CacheOutcome::ImageHit,
            });
        }

        match &self.in_flight {
            None => self.rebuild(layer_id, key).await,
            Some(in_flight) => self.rebuild_single_flight(in_flight, layer_id, key).await,
        }
    }

    /// Drop a tile image from the image tier. The rebuild record stays.
    pub async fn evict_image(&self, layer_id: &str, key: &str) -> Result<bool, CacheError> {
        self.cache
            .remove(CacheCategory::Rasterizing, layer_id, key)
            .await
    }

    pub fn cache_stats(&self) -> ServiceStats {
        ServiceStats {
            rasterizing: self.cache.stats(CacheCategory::Rasterizing),
            rebuild: self.cache.stats(CacheCategory::Rebuild),
        }
    }

    /// Image tier lookup. Errors and corrupt entries count as a miss.
    async fn lookup_image(&self, layer_id: &str, key: &str) -> Option<RasterizingContainer> {
        let raw = match self
            .cache
            .get(CacheCategory::Rasterizing, layer_id, key)
            .await
        {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(layer_id, key, error = %e, "Image cache unavailable, treating as miss");
                return None;
            }
        };

        match RasterizingContainer::decode(raw) {
            Ok(container) => Some(container),
            Err(e) => {
                warn!(layer_id, key, error = %e, "Dropping corrupt image cache entry");
                let _ = self.evict_image(layer_id, key).await;
                None
            }
        }
    }

    async fn rebuild_single_flight(
        &self,
        in_flight: &InFlight,
        layer_id: &str,
        key: &str,
    ) -> Result<RasterizingResponse, RasterizeError> {
        let flight_key = (layer_id.to_string(), key.to_string());
        loop {
            let notify = {
                let mut flights = in_flight
                    .flights
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                match flights.get(&flight_key) {
                    Some(notify) => Err(Arc::clone(notify)),
                    None => {
                        let notify = Arc::new(Notify::new());
                        flights.insert(flight_key.clone(), Arc::clone(&notify));
                        Ok(notify)
                    }
                }
            };

            match notify {
                Ok(notify) => {
                    let _guard = FlightGuard {
                        in_flight,
                        key: flight_key.clone(),
                        notify,
                    };
                    // A previous leader may have finished since our first lookup.
                    if let Some(container) = self.lookup_image(layer_id, key).await {
                        return Ok(RasterizingResponse {
                            container,
                            outcome: CacheOutcome::ImageHit,
                        });
                    }
                    return self.rebuild(layer_id, key).await;
                }
                Err(notify) => {
                    // Register before re-checking so the leader's wakeup cannot be missed.
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let still_flying = in_flight
                        .flights
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&flight_key)
                        .is_some_and(|current| Arc::ptr_eq(current, &notify));
                    if still_flying {
                        notified.await;
                    }

                    if let Some(container) = self.lookup_image(layer_id, key).await {
                        return Ok(RasterizingResponse {
                            container,
                            outcome: CacheOutcome::ImageHit,
                        });
                    }
                    // Leader failed; try to become the leader ourselves.
                }
            }
        }
    }

    async fn rebuild(
        &self,
        layer_id: &str,
        key: &str,
    ) -> Result<RasterizingResponse, RasterizeError> {
        let raw = match self.cache.get(CacheCategory::Rebuild, layer_id, key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(layer_id, key, state = "rebuild_miss", "No rebuild record");
                return Err(missing(layer_id, key));
            }
            Err(e) => {
                error!(layer_id, key, error = %e, "Rebuild cache unavailable");
                return Err(e.into());
            }
        };

        let record = RebuildCacheContainer::from_bytes(&raw)?;
        if record.metadata.layer_id != layer_id {
            warn!(
                layer_id,
                key,
                stored_layer = %record.metadata.layer_id,
                "Rebuild record belongs to another layer"
            );
            return Err(missing(layer_id, key));
        }

        let context = self.build_context(record.metadata, record.security)?;
        debug!(
            layer_id,
            key,
            tile = %context.metadata.code,
            state = "rebuild_hit",
            "Rendering tile from rebuild record"
        );

        let container = match self.delegate.render(&context).await {
            Ok(container) => container,
            Err(source) => {
                error!(
                    layer_id,
                    key,
                    tile = %context.metadata.code,
                    error = %source,
                    state = "render_failure",
                    "Tile rendering failed"
                );
                return Err(RasterizeError::Render {
                    key: key.to_string(),
                    source,
                });
            }
        };

        if let Err(e) = self
            .cache
            .put(CacheCategory::Rasterizing, layer_id, key, container.encode())
            .await
        {
            warn!(layer_id, key, error = %e, "Could not store rendered tile");
        }

        info!(
            layer_id,
            key,
            tile = %context.metadata.code,
            bytes = container.data.len(),
            state = "render_success",
            "Tile rebuilt"
        );

        Ok(RasterizingResponse {
            container,
            outcome: CacheOutcome::Rebuilt,
        })
    }

    /// Resolve layer and geometry for a render request.
    fn build_context(
        &self,
        metadata: TileMetadata,
        security: SecurityContext,
    ) -> Result<RenderContext, RasterizeError> {
        let layer = self
            .layers
            .get(&metadata.layer_id)
            .ok_or_else(|| RasterizeError::UnknownLayer(metadata.layer_id.clone()))?
            .clone();

        let geometry = TileGeometry::new(layer.max_extent, metadata.scale, metadata.code.level)?;
        let bounds = geometry.bounds_for(&metadata.code)?;

        Ok(RenderContext {
            metadata,
            layer,
            geometry,
            bounds,
            security,
        })
    }
}

fn missing(layer_id: &str, key: &str) -> RasterizeError {
    RasterizeError::RebuildDataMissing {
        layer_id: layer_id.to_string(),
        key: key.to_string(),
    }
}
