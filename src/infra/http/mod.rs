//! HTTP surface: WebSocket endpoint, health probes and the debug stats route.

mod health;
mod middleware;
pub mod rate_limit;
mod ws;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::{cache::CacheService, realtime::ConnectionRegistry};

use self::middleware::{log_responses, set_request_context};
pub use self::rate_limit::{RateDecision, RateLimitPolicy, RateLimiter, client_ip};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub registry: ConnectionRegistry,
    pub expose_debug_stats: bool,
}

/// Build the application router. Requests pass through the rate limiter when
/// one is supplied.
pub fn build_router(state: AppState, rate_limiter: Option<RateLimiter>) -> Router {
    build_router_with(state, Router::new(), rate_limiter)
}

/// Like [`build_router`], with `api` merged in before the rate limiting and
/// logging layers so the debate and extraction routes served by an embedding
/// application get their per-route ceilings.
pub fn build_router_with(
    state: AppState,
    api: Router,
    rate_limiter: Option<RateLimiter>,
) -> Router {
    let router = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::health_detailed))
        .route("/health/cache", get(health::health_cache))
        .route("/health/websockets", get(health::health_websockets))
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/api/cache/stats", get(health::cache_stats))
        .with_state(state)
        .merge(api);

    let router = match rate_limiter {
        Some(limiter) => router.layer(axum_middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit,
        )),
        None => router,
    };

    router
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
