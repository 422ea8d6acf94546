use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use super::AppState;

/// Readiness fails above this queue usage.
const READY_MAX_USAGE: f64 = 0.95;

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub size: usize,
    pub capacity: usize,
    pub usage: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueHealth,
    pub workers: usize,
    #[serde(rename = "async")]
    pub async_processing: bool,
}

fn snapshot(state: &AppState, status: &'static str) -> HealthResponse {
    let (size, capacity) = state.queue_stats();
    HealthResponse {
        status,
        version: crate::get_bot_version(),
        uptime_seconds: state.started.elapsed().as_secs(),
        queue: QueueHealth {
            size,
            capacity,
            usage: usage(size, capacity),
        },
        workers: state.workers,
        async_processing: state.queue.is_some(),
    }
}

fn usage(size: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        size as f64 / capacity as f64
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(snapshot(&state, "healthy"))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let (size, capacity) = state.queue_stats();
    if usage(size, capacity) > READY_MAX_USAGE {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(snapshot(&state, "overloaded")),
        )
            .into_response();
    }
    Json(snapshot(&state, "ready")).into_response()
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let (size, capacity) = state.queue_stats();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(size, capacity),
    )
        .into_response()
}
