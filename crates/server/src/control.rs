//! HTTP control plane.
//!
//! Small axum router on the data port + 1000 exposing health, connection
//! stats and online limit administration. Bodies and replies are JSON;
//! rejected updates come back as 400 with an explanation.

use crate::admission::{ConnectionLimiter, DEFAULT_NUDGE};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
struct ControlState {
    limiter: Arc<ConnectionLimiter>,
    service: String,
    started: Instant,
}

/// Build the control-plane router.
pub fn router(limiter: Arc<ConnectionLimiter>, service: impl Into<String>) -> Router {
    let state = ControlState {
        limiter,
        service: service.into(),
        started: Instant::now(),
    };
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/limit", get(get_limit).put(put_limit))
        .route("/limit/increase", post(increase))
        .route("/limit/decrease", post(decrease))
        .with_state(state)
}

async fn health(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service,
    }))
}

async fn stats(State(state): State<ControlState>) -> Json<Value> {
    let stats = state.limiter.stats();
    Json(json!({
        "active_connections": stats.active,
        "max_connections": stats.max,
        "usage_pct": stats.usage_pct,
        "free": stats.free,
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

async fn get_limit(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({
        "current_limit": state.limiter.max(),
        "active_connections": state.limiter.active(),
    }))
}

#[derive(Debug, Deserialize)]
struct PutLimit {
    limit: usize,
}

async fn put_limit(
    State(state): State<ControlState>,
    Json(body): Json<PutLimit>,
) -> (StatusCode, Json<Value>) {
    match state.limiter.update_limit(body.limit) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "updated", "limit": body.limit})),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Nudge {
    amount: Option<usize>,
}

async fn increase(
    State(state): State<ControlState>,
    Json(body): Json<Nudge>,
) -> (StatusCode, Json<Value>) {
    let amount = body.amount.unwrap_or(DEFAULT_NUDGE);
    match state.limiter.increase(amount) {
        Ok(limit) => (
            StatusCode::OK,
            Json(json!({"status": "updated", "limit": limit})),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}

async fn decrease(
    State(state): State<ControlState>,
    Json(body): Json<Nudge>,
) -> (StatusCode, Json<Value>) {
    let amount = body.amount.unwrap_or(DEFAULT_NUDGE);
    match state.limiter.decrease(amount) {
        Ok(limit) => (
            StatusCode::OK,
            Json(json!({"status": "updated", "limit": limit})),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}
