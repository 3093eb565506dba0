use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::error::HttpError;

use super::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now(),
        "version": VERSION,
    }))
}

/// The in-process tier keeps the service usable without Redis, so a lost
/// remote store degrades the report instead of failing it.
pub(super) async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache.stats().await;
    let websockets = state.registry.stats();
    let status = if cache.remote_connected {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "timestamp": now(),
        "version": VERSION,
        "services": {
            "cache": cache,
            "websockets": websockets,
        },
    }))
}

pub(super) async fn health_cache(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "timestamp": now(),
        "cache_stats": state.cache.stats().await,
    }))
}

pub(super) async fn health_websockets(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "timestamp": now(),
        "websocket_stats": state.registry.stats(),
    }))
}

pub(super) async fn liveness() -> Json<Value> {
    Json(json!({
        "status": "alive",
        "timestamp": now(),
        "version": VERSION,
    }))
}

pub(super) async fn readiness() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "timestamp": now(),
        "version": VERSION,
    }))
}

pub(super) async fn cache_stats(State(state): State<AppState>) -> Response {
    if !state.expose_debug_stats {
        return HttpError::not_found(
            "infra::http::health::cache_stats",
            "debug stats are not exposed",
        )
        .into_response();
    }

    Json(json!({
        "cache_stats": state.cache.stats().await,
        "websocket_stats": state.registry.stats(),
    }))
    .into_response()
}
