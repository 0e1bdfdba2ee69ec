//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                     - Health check
//! /stats                                      - Cache counters
//! /rasterizing/layer/{layer_id}               - Register a render request (POST)
//! /rasterizing/layer/{layer_id}/{key}.png     - Rasterized tile image (GET)
//! /tiles/url/{level}/{x}/{y}                  - Round-robin tile URL (GET)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rasterizing_cache::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(service, url_builder, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, prepare_handler, rasterizing_handler, stats_handler, tile_url_handler,
    AppState, AUTHORIZATIONS_HEADER, USER_ID_HEADER,
};
use crate::rasterizing::{RasterizingService, RenderingDelegate};
use crate::tile::RoundRobinUrlBuilder;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Any CORS origin, one hour max-age, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router<D>(
    service: RasterizingService<D>,
    url_builder: RoundRobinUrlBuilder,
    config: RouterConfig,
) -> Router
where
    D: RenderingDelegate + 'static,
{
    let app_state = AppState::with_cache_max_age(service, url_builder, config.cache_max_age);
    let cors = build_cors_layer(&config);

    // {filename} captures both "{key}" and "{key}.png"
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler::<D>))
        .route("/rasterizing/layer/{layer_id}", post(prepare_handler::<D>))
        .route(
            "/rasterizing/layer/{layer_id}/{filename}",
            get(rasterizing_handler::<D>),
        )
        .route("/tiles/url/{level}/{x}/{y}", get(tile_url_handler::<D>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(AUTHORIZATIONS_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}
