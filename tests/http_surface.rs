use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::RETRY_AFTER},
    response::Response,
    routing::post,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use hemicycle::{
    cache::{CacheConfig, CacheService},
    infra::http::{AppState, RateLimitPolicy, RateLimiter, build_router, build_router_with},
    realtime::{ConnectionRegistry, RealtimeConfig},
};

fn state(expose_debug_stats: bool) -> AppState {
    AppState {
        cache: Arc::new(CacheService::memory_only(CacheConfig::default())),
        registry: ConnectionRegistry::new(RealtimeConfig::default()),
        expose_debug_stats,
    }
}

fn app(expose_debug_stats: bool, limiter: Option<RateLimiter>) -> Router {
    build_router(state(expose_debug_stats), limiter)
}

async fn get(router: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_status_and_request_id() {
    let router = app(false, None);

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    for probe in ["/health/liveness", "/health/readiness"] {
        assert_eq!(get(&router, probe).await.status(), StatusCode::OK, "{probe}");
    }
}

#[tokio::test]
async fn detailed_health_is_degraded_without_remote_cache() {
    let router = app(false, None);

    let body = json_body(get(&router, "/health/detailed").await).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["cache"]["remote_connected"], false);
    assert_eq!(body["services"]["websockets"]["total_connections"], 0);

    let body = json_body(get(&router, "/health/cache").await).await;
    assert_eq!(body["cache_stats"]["in_process_capacity"], 1000);

    let body = json_body(get(&router, "/health/websockets").await).await;
    assert_eq!(body["websocket_stats"]["total_channels"], 0);
}

#[tokio::test]
async fn cache_stats_are_hidden_unless_exposed() {
    let hidden = get(&app(false, None), "/api/cache/stats").await;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(hidden).await["error"], "Not found");

    let exposed = get(&app(true, None), "/api/cache/stats").await;
    assert_eq!(exposed.status(), StatusCode::OK);
    let body = json_body(exposed).await;
    assert!(body["cache_stats"].is_object());
    assert!(body["websocket_stats"].is_object());
}

#[tokio::test]
async fn rate_limited_requests_get_429_with_retry_hint() {
    let limiter = RateLimiter::new(RateLimitPolicy {
        per_minute: 2,
        ..RateLimitPolicy::default()
    });
    let router = app(false, Some(limiter));

    let first = get(&router, "/health/liveness").await;
    assert_eq!(first.status(), StatusCode::OK);
    // /health routes carry their own ceiling.
    assert_eq!(first.headers()["x-ratelimit-limit"], "200");

    for _ in 0..2 {
        assert_eq!(get(&router, "/api/cache/stats").await.status(), StatusCode::NOT_FOUND);
    }
    let limited = get(&router, "/api/cache/stats").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers()[RETRY_AFTER], "60");
    assert_eq!(limited.headers()["x-ratelimit-remaining"], "0");
    let body = json_body(limited).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["retry_after"], "60 seconds");
}

#[tokio::test]
async fn mounted_extraction_route_gets_its_own_ceiling() {
    let api = Router::new().route("/api/extraction/{debate_id}", post(|| async { "queued" }));
    let router = build_router_with(
        state(false),
        api,
        Some(RateLimiter::new(RateLimitPolicy::default())),
    );
    let extract = || {
        Request::builder()
            .method("POST")
            .uri("/api/extraction/d1")
            .header("x-forwarded-for", "203.0.113.8")
            .body(Body::empty())
            .unwrap()
    };

    let first = router.clone().oneshot(extract()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "10");
    assert!(first.headers().contains_key("x-request-id"));

    for _ in 1..10 {
        assert_eq!(
            router.clone().oneshot(extract()).await.unwrap().status(),
            StatusCode::OK
        );
    }
    let limited = router.clone().oneshot(extract()).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    // The default scope is untouched by the extraction bucket.
    assert_eq!(get(&router, "/health/readiness").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn websocket_route_requires_upgrade() {
    let response = get(&app(false, None), "/ws?client_id=abc").await;
    assert!(response.status().is_client_error());
}
