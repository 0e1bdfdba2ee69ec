//! API integration tests for render requests and tile retrieval.
//!
//! Tests verify:
//! - Registering a render request and fetching its image
//! - Cache hit headers on repeated fetches
//! - 204 responses for every fetch failure
//! - JSON error responses of the registration endpoint

use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use rasterizing_cache::cache::CacheCategory;
use rasterizing_cache::rasterizing::StyledTileRenderer;
use rasterizing_cache::server::{AUTHORIZATIONS_HEADER, USER_ID_HEADER};

use super::test_utils::{
    flaky_service, get, is_valid_png, post_json, post_json_with_headers, test_router,
    test_service, CountingDelegate, FlakyStore, TEST_LAYER,
};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn tile_request() -> serde_json::Value {
    json!({
        "code": { "level": 1, "x": 1, "y": 0 },
        "scale": 1.0,
        "style": { "fill": "#ff0000" }
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

// =============================================================================
// Prepare and Fetch
// =============================================================================

#[tokio::test]
async fn test_prepare_returns_tile_description() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router
        .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let key = json["key"].as_str().unwrap();
    assert_eq!(key.len(), 64);
    assert_eq!(
        json["url"],
        format!("/rasterizing/layer/{}/{}.png", TEST_LAYER, key)
    );
    assert_eq!(json["bounds"]["min_x"], 128.0);
    assert_eq!(json["bounds"]["max_x"], 256.0);
    assert_eq!(json["bounds"]["min_y"], 0.0);
    assert_eq!(json["bounds"]["max_y"], 128.0);
    assert_eq!(json["screen_width"], 128);
    assert_eq!(json["screen_height"], 128);
}

#[tokio::test]
async fn test_prepare_is_deterministic() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let first = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        router
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["key"], second["key"]);
}

#[tokio::test]
async fn test_fetch_renders_png() {
    let (service, _) = test_service(StyledTileRenderer::new());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let url = prepared["url"].as_str().unwrap();

    let response = router.oneshot(get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_png(&body), "Response should be a valid PNG");
}

#[tokio::test]
async fn test_second_fetch_is_cache_hit() {
    let delegate = CountingDelegate::new();
    let (service, _) = test_service(delegate.clone());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let url = prepared["url"].as_str().unwrap().to_string();
    assert_eq!(delegate.calls(), 0, "prepare must not render");

    let first = router.clone().oneshot(get(&url)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-tile-cache-hit").unwrap(), "false");

    let second = router.clone().oneshot(get(&url)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-tile-cache-hit").unwrap(), "true");

    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"roads:1-1-0");
    assert_eq!(delegate.calls(), 1);
}

#[tokio::test]
async fn test_fetch_without_extension() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let key = prepared["key"].as_str().unwrap();

    let response = router
        .oneshot(get(&format!("/rasterizing/layer/roads/{}", key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Fetch Failures
// =============================================================================

#[tokio::test]
async fn test_unknown_key_is_no_content() {
    let delegate = CountingDelegate::new();
    let (service, _) = test_service(delegate.clone());
    let router = test_router(service);

    let response = router
        .oneshot(get("/rasterizing/layer/roads/deadbeef.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
    assert_eq!(delegate.calls(), 0);
}

#[tokio::test]
async fn test_key_under_wrong_layer_is_no_content() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let key = prepared["key"].as_str().unwrap();

    let response = router
        .oneshot(get(&format!("/rasterizing/layer/parcels/{}.png", key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_render_failure_is_no_content() {
    let delegate = CountingDelegate::new();
    delegate.set_failing(true);
    let (service, _) = test_service(delegate.clone());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let url = prepared["url"].as_str().unwrap();

    let response = router.oneshot(get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(delegate.calls(), 1);
}

#[tokio::test]
async fn test_unreadable_rebuild_tier_is_no_content() {
    let delegate = CountingDelegate::new();
    let (image, rebuild) = (FlakyStore::new(), FlakyStore::new());
    let router = test_router(flaky_service(delegate.clone(), &image, &rebuild));

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let url = prepared["url"].as_str().unwrap();

    rebuild.set_failing_reads(true);
    let response = router.oneshot(get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(delegate.calls(), 0);
}

#[tokio::test]
async fn test_security_snapshot_applies_at_render_time() {
    let (service, _) = test_service(StyledTileRenderer::new());
    let router = test_router(service);

    let response = router
        .clone()
        .oneshot(post_json_with_headers(
            "/rasterizing/layer/roads",
            tile_request(),
            &[(USER_ID_HEADER, "alice"), (AUTHORIZATIONS_HEADER, "parcels")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let prepared = body_json(response).await;

    // The caller could not view the layer; the rebuild renders with that snapshot.
    let response = router
        .oneshot(get(prepared["url"].as_str().unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_authorizations_change_key() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let open = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let restricted = body_json(
        router
            .oneshot(post_json_with_headers(
                "/rasterizing/layer/roads",
                tile_request(),
                &[(AUTHORIZATIONS_HEADER, "roads")],
            ))
            .await
            .unwrap(),
    )
    .await;

    assert_ne!(open["key"], restricted["key"]);
}

// =============================================================================
// Prepare Errors
// =============================================================================

#[tokio::test]
async fn test_prepare_unknown_layer() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router
        .oneshot(post_json("/rasterizing/layer/nope", tile_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "unknown_layer");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_prepare_invalid_scale() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router
        .oneshot(post_json(
            "/rasterizing/layer/roads",
            json!({ "code": { "level": 1, "x": 0, "y": 0 }, "scale": -2.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_geometry");
}

#[tokio::test]
async fn test_prepare_super_tile_rejected() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router
        .oneshot(post_json(
            "/rasterizing/layer/roads",
            json!({ "code": { "level": 2, "x": -1, "y": 0 }, "scale": 1.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_prepare_negative_codes_rejected() {
    let (service, cache) = test_service(CountingDelegate::new());
    let router = test_router(service);

    for code in [
        json!({ "level": 1, "x": 0, "y": -3 }),
        json!({ "level": 1, "x": -5, "y": 0 }),
    ] {
        let response = router
            .clone()
            .oneshot(post_json(
                "/rasterizing/layer/roads",
                json!({ "code": code, "scale": 1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_geometry");
    }
    assert_eq!(cache.len(CacheCategory::Rebuild).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prepare_oversized_tile_rejected() {
    let (service, _) = test_service(StyledTileRenderer::with_max_size(64));
    let router = test_router(service);

    let response = router
        .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "tile_too_large");
}

#[tokio::test]
async fn test_prepare_malformed_body() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router
        .oneshot(post_json(
            "/rasterizing/layer/roads",
            json!({ "scale": 1.0 }),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

// =============================================================================
// Tile URLs and Stats
// =============================================================================

#[tokio::test]
async fn test_tile_url_endpoint() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let response = router.oneshot(get("/tiles/url/1/2/3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let url = json["url"].as_str().unwrap();
    assert!(url.starts_with("http://"));
    assert!(url.ends_with(".tile.openstreetmap.org/1/2/3.png"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (service, _) = test_service(CountingDelegate::new());
    let router = test_router(service);

    let prepared = body_json(
        router
            .clone()
            .oneshot(post_json("/rasterizing/layer/roads", tile_request()))
            .await
            .unwrap(),
    )
    .await;
    let url = prepared["url"].as_str().unwrap().to_string();
    router.clone().oneshot(get(&url)).await.unwrap();
    router.clone().oneshot(get(&url)).await.unwrap();

    let json = body_json(router.oneshot(get("/stats")).await.unwrap()).await;
    assert_eq!(json["rasterizing"]["hits"], 1);
    assert_eq!(json["rasterizing"]["misses"], 1);
    assert_eq!(json["rasterizing"]["entries"], 1);
    assert_eq!(json["rebuild"]["writes"], 1);
    assert_eq!(json["rebuild"]["entries"], 1);
    assert_eq!(json["single_flight"], false);
    assert_eq!(json["layers"], json!(["parcels", "roads"]));
}
