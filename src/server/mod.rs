//! HTTP server layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET  /rasterizing/layer/{layer_id}/{key}.png             │
//! │        POST /rasterizing/layer/{layer_id}                       │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error codes)  │  │  (router config, CORS)      │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, prepare_handler, rasterizing_handler, security_from_headers, stats_handler,
    tile_url_handler, AppState, ErrorResponse, HealthResponse, PrepareRequest,
    RasterizingPathParams, StatsResponse, TierStatsResponse, TileUrlResponse,
    AUTHORIZATIONS_HEADER, CACHE_HIT_HEADER, USER_ID_HEADER,
};
pub use routes::{create_router, RouterConfig};
