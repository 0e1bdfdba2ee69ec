//! HTTP request handlers for the rasterizing API.
//!
//! # Endpoints
//!
//! - `GET /rasterizing/layer/{layer_id}/{key}.png` - Serve a rasterized tile
//! - `POST /rasterizing/layer/{layer_id}` - Register a render request
//! - `GET /tiles/url/{level}/{x}/{y}` - Next round-robin URL for a tile
//! - `GET /stats` - Cache counters
//! - `GET /health` - Health check endpoint

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::cache::{CacheCategory, CacheStatsSnapshot};
use crate::error::{CacheError, RasterizeError, RenderError};
use crate::rasterizing::{
    PreparedTile, RasterizingService, RenderingDelegate, SecurityContext, TileMetadata,
};
use crate::tile::{RoundRobinUrlBuilder, TileCode};

/// Header carrying the id of the caller, set by an upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's comma-separated layer authorizations.
pub const AUTHORIZATIONS_HEADER: &str = "x-authorizations";

/// Header telling whether a tile came straight from the image cache.
pub const CACHE_HIT_HEADER: &str = "x-tile-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<D: RenderingDelegate> {
    pub service: Arc<RasterizingService<D>>,

    /// Builds public tile URLs for the `/tiles/url` endpoint
    pub url_builder: Arc<RoundRobinUrlBuilder>,

    /// Cache-Control max-age in seconds for served tiles
    pub cache_max_age: u32,
}

impl<D: RenderingDelegate> AppState<D> {
    pub fn new(service: RasterizingService<D>, url_builder: RoundRobinUrlBuilder) -> Self {
        Self::with_cache_max_age(service, url_builder, 3600)
    }

    pub fn with_cache_max_age(
        service: RasterizingService<D>,
        url_builder: RoundRobinUrlBuilder,
        cache_max_age: u32,
    ) -> Self {
        Self {
            service: Arc::new(service),
            url_builder: Arc::new(url_builder),
            cache_max_age,
        }
    }
}

impl<D: RenderingDelegate> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            url_builder: Arc::clone(&self.url_builder),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters of the tile image endpoint.
///
/// Extracted from: `/rasterizing/layer/{layer_id}/{filename}`
/// where filename is `{key}.png` or a bare `{key}`
#[derive(Debug, Deserialize)]
pub struct RasterizingPathParams {
    pub layer_id: String,
    pub filename: String,
}

impl RasterizingPathParams {
    /// The fingerprint, with any `.png` extension stripped.
    pub fn key(&self) -> Option<&str> {
        let key = self
            .filename
            .strip_suffix(".png")
            .unwrap_or(&self.filename);
        (!key.is_empty()).then_some(key)
    }
}

/// Body of a render request.
#[derive(Debug, Clone, Deserialize)]
pub struct PrepareRequest {
    pub code: TileCode,

    /// Pixels per world unit
    pub scale: f64,

    /// Defaults to the layer's CRS
    #[serde(default)]
    pub crs: Option<String>,

    #[serde(default)]
    pub style: BTreeMap<String, String>,

    #[serde(default)]
    pub filter: Option<String>,
}

/// Read the caller's rights from the gateway headers.
///
/// Without an authorizations header the caller is unrestricted.
pub fn security_from_headers(headers: &HeaderMap) -> SecurityContext {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match headers
        .get(AUTHORIZATIONS_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => SecurityContext::new(
            user_id,
            raw.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        None => SecurityContext {
            user_id,
            ..SecurityContext::unrestricted()
        },
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_geometry")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of the tile URL endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct TileUrlResponse {
    pub url: String,
}

/// Counters and size of one cache tier.
#[derive(Debug, Serialize)]
pub struct TierStatsResponse {
    #[serde(flatten)]
    pub counters: CacheStatsSnapshot,

    /// Number of stored entries, absent if the tier could not be read
    pub entries: Option<usize>,
}

/// Response of the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub rasterizing: TierStatsResponse,
    pub rebuild: TierStatsResponse,
    pub single_flight: bool,
    pub layers: Vec<String>,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl RasterizeError {
    /// HTTP status and error type identifier of this error.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            RasterizeError::RebuildDataMissing { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RasterizeError::UnknownLayer(_) => (StatusCode::NOT_FOUND, "unknown_layer"),
            RasterizeError::Geometry(_) => (StatusCode::BAD_REQUEST, "invalid_geometry"),
            RasterizeError::Render { source, .. } => match source {
                RenderError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
                RenderError::InvalidStyle { .. } => (StatusCode::BAD_REQUEST, "invalid_style"),
                RenderError::TooLarge { .. } => (StatusCode::BAD_REQUEST, "tile_too_large"),
                RenderError::Encode(_) | RenderError::Backend(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "render_error")
                }
            },
            RasterizeError::Cache(CacheError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable")
            }
            RasterizeError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
        }
    }
}

/// Logs by severity: 5xx at ERROR, 404 at DEBUG, other 4xx at WARN.
fn log_error(status: StatusCode, error_type: &str, message: &str) {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }
}

impl IntoResponse for RasterizeError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        let message = self.to_string();
        log_error(status, error_type, &message);

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Serve a rasterized tile image.
///
/// # Endpoint
///
/// `GET /rasterizing/layer/{layer_id}/{key}.png`
///
/// # Response
///
/// - `200 OK` with the image and `X-Tile-Cache-Hit: true|false`
/// - `204 No Content` for any failure; the cause is only logged
pub async fn rasterizing_handler<D: RenderingDelegate + 'static>(
    State(state): State<AppState<D>>,
    Path(params): Path<RasterizingPathParams>,
) -> Response {
    let Some(key) = params.key() else {
        debug!(layer_id = %params.layer_id, "Empty tile key");
        return StatusCode::NO_CONTENT.into_response();
    };

    match state.service.get(&params.layer_id, key).await {
        Ok(response) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, response.container.content_type.clone()),
                (
                    header::CACHE_CONTROL,
                    format!("public, max-age={}", state.cache_max_age),
                ),
                (
                    header::HeaderName::from_static(CACHE_HIT_HEADER),
                    response.cache_hit().to_string(),
                ),
            ],
            Body::from(response.container.data),
        )
            .into_response(),
        Err(e) => {
            let (status, error_type) = e.status();
            log_error(status, error_type, &e.to_string());
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Register a render request.
///
/// # Endpoint
///
/// `POST /rasterizing/layer/{layer_id}`
///
/// ```json
/// { "code": { "level": 3, "x": 2, "y": 5 }, "scale": 0.001,
///   "style": { "fill": "#3388ff80" } }
/// ```
///
/// # Response
///
/// `200 OK` with the fingerprint, the image URL, the tile bounds and its
/// pixel size. The image is rendered on its first fetch.
pub async fn prepare_handler<D: RenderingDelegate + 'static>(
    State(state): State<AppState<D>>,
    Path(layer_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<PreparedTile>, RasterizeError> {
    let crs = match request.crs {
        Some(crs) => crs,
        None => state
            .service
            .layers()
            .get(&layer_id)
            .map(|layer| layer.crs.clone())
            .ok_or_else(|| RasterizeError::UnknownLayer(layer_id.clone()))?,
    };

    let mut metadata = TileMetadata::new(layer_id, request.code, crs, request.scale);
    metadata.style = request.style;
    metadata.filter = request.filter;

    let prepared = state
        .service
        .prepare(metadata, security_from_headers(&headers))
        .await?;
    Ok(Json(prepared))
}

/// Next public URL for a tile, rotating over the configured base URLs.
///
/// # Endpoint
///
/// `GET /tiles/url/{level}/{x}/{y}`
pub async fn tile_url_handler<D: RenderingDelegate + 'static>(
    State(state): State<AppState<D>>,
    Path((level, x, y)): Path<(u32, i32, i32)>,
) -> Json<TileUrlResponse> {
    Json(TileUrlResponse {
        url: state.url_builder.build_url(level, x, y),
    })
}

/// Cache counters of both tiers.
///
/// # Endpoint
///
/// `GET /stats`
pub async fn stats_handler<D: RenderingDelegate + 'static>(
    State(state): State<AppState<D>>,
) -> Json<StatsResponse> {
    let service = &state.service;
    let stats = service.cache_stats();
    let cache = service.cache();

    Json(StatsResponse {
        rasterizing: TierStatsResponse {
            counters: stats.rasterizing,
            entries: cache.len(CacheCategory::Rasterizing).await.ok(),
        },
        rebuild: TierStatsResponse {
            counters: stats.rebuild,
            entries: cache.len(CacheCategory::Rebuild).await.ok(),
        },
        single_flight: service.single_flight(),
        layers: service
            .layers()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
