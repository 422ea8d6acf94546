//! HTTP front-end: webhook intake, health, readiness and metrics.

pub mod health;
pub mod payload;
pub mod signature;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::handler::Executor;
use crate::metrics::Metrics;
use crate::platform::Platform;
use crate::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};
use crate::worker::{process_event, WebhookJob};
use payload::{Delivery, WebhookEvent};
use signature::{
    verify_github_signature, verify_gitlab_token, GITHUB_SIGNATURE_HEADER, GITLAB_TOKEN_HEADER,
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub config: Arc<Config>,
    pub executor: Arc<Executor>,
    pub metrics: Arc<Metrics>,
    /// Present in async mode.
    pub queue: Option<mpsc::Sender<WebhookJob>>,
    pub workers: usize,
    pub started: Instant,
}

impl AppState {
    pub fn new(executor: Arc<Executor>, queue: Option<mpsc::Sender<WebhookJob>>, workers: usize) -> Self {
        Self {
            config: executor.config().clone(),
            metrics: executor.metrics().clone(),
            executor,
            queue,
            workers,
            started: Instant::now(),
        }
    }

    /// Queued jobs and queue capacity; zero in sync mode.
    pub fn queue_stats(&self) -> (usize, usize) {
        match &self.queue {
            Some(sender) => {
                let capacity = sender.max_capacity();
                (capacity.saturating_sub(sender.capacity()), capacity)
            }
            None => (0, 0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: String,
    pub event_id: String,
}

struct Reply {
    code: StatusCode,
    status: &'static str,
    message: String,
}

impl Reply {
    fn new(code: StatusCode, status: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }
}

pub fn router(state: Arc<AppState>, limiter: Option<Arc<RateLimiter>>) -> Router {
    let paths = &state.config.webhook;
    let ready_path = format!("{}/ready", paths.health_path.trim_end_matches('/'));
    let rate_limit = RateLimitState {
        limiter,
        metrics: state.metrics.clone(),
    };

    Router::new()
        .route(&paths.webhook_path, post(webhook_handler))
        .route(&paths.health_path, get(health::health))
        .route(&ready_path, get(health::ready))
        .route(&paths.metrics_path, get(health::metrics))
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    rate_limit,
                    rate_limit_middleware,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-frame-options"),
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-xss-protection"),
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Platform, event name and delivery id of a request.
fn identify(headers: &HeaderMap) -> Option<(Platform, String, String)> {
    let (platform, event, delivery) = if let Some(event) = header(headers, "x-github-event") {
        (Platform::GitHub, event, header(headers, "x-github-delivery"))
    } else if let Some(event) = header(headers, "x-gitlab-event") {
        let delivery =
            header(headers, "x-gitlab-delivery").or_else(|| header(headers, "x-gitlab-event-uuid"));
        (Platform::GitLab, event, delivery)
    } else {
        return None;
    };
    let event_id = delivery
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    Some((platform, event.to_string(), event_id))
}

fn signature_valid(config: &Config, platform: Platform, headers: &HeaderMap, body: &[u8]) -> bool {
    let secret = &config.webhook.secret;
    if secret.is_empty() {
        return !config.webhook.require_signature;
    }
    match platform {
        Platform::GitHub => header(headers, GITHUB_SIGNATURE_HEADER)
            .is_some_and(|sig| verify_github_signature(secret, body, sig)),
        Platform::GitLab => header(headers, GITLAB_TOKEN_HEADER)
            .is_some_and(|token| verify_gitlab_token(secret, token)),
    }
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((platform, event, event_id)) = identify(&headers) else {
        warn!("Webhook without a platform event header");
        state.metrics.webhook_request("unknown", "bad_request");
        return respond(
            Reply::new(StatusCode::BAD_REQUEST, "error", "missing event header"),
            String::new(),
        );
    };
    info!("Received {} {} delivery {}", platform, event, event_id);

    let reply = handle_delivery(&state, platform, &event, &event_id, &headers, &body).await;
    state.metrics.webhook_request(platform.as_str(), reply.status);
    respond(reply, event_id)
}

async fn handle_delivery(
    state: &AppState,
    platform: Platform,
    event: &str,
    event_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Reply {
    let config = &state.config;
    if platform != config.platform {
        warn!("Got a {} delivery but serving {}", platform, config.platform);
        return Reply::new(
            StatusCode::BAD_REQUEST,
            "error",
            format!("this service handles {} deliveries", config.platform),
        );
    }

    if !signature_valid(config, platform, headers, body) {
        error!("Invalid webhook signature on delivery {}", event_id);
        return Reply::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid signature");
    }

    if let Some(repo) = payload::repository(platform, body) {
        if !payload::repo_allowed(&config.webhook.allowed_repos, &repo) {
            warn!("Repository {} is not allowed", repo);
            return Reply::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                format!("repository {} is not allowed", repo),
            );
        }
    }

    let delivery = match payload::parse(
        platform,
        event,
        body,
        event_id,
        config.webhook.pr_events.as_ref(),
    ) {
        Ok(delivery) => delivery,
        Err(e) => {
            warn!("Could not parse {} payload: {}", event, e);
            return Reply::new(StatusCode::BAD_REQUEST, "error", e.to_string());
        }
    };

    match delivery {
        Delivery::Skipped(reason) => {
            info!("Skipping delivery {}: {}", event_id, reason);
            Reply::new(StatusCode::OK, "skipped", reason)
        }
        Delivery::Event(event) => dispatch(state, event).await,
    }
}

async fn dispatch(state: &AppState, event: WebhookEvent) -> Reply {
    let target = event.target().clone();
    match &state.queue {
        Some(queue) => match queue.try_send(WebhookJob::new(event)) {
            Ok(()) => {
                info!("Queued job for {}", target);
                Reply::new(StatusCode::OK, "queued", format!("queued {}", target))
            }
            Err(TrySendError::Full(_)) => {
                warn!("Queue full, rejecting job for {}", target);
                Reply::new(StatusCode::SERVICE_UNAVAILABLE, "queue_full", "queue is full")
            }
            Err(TrySendError::Closed(_)) => {
                error!("Queue closed, rejecting job for {}", target);
                Reply::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "queue_closed",
                    "service is shutting down",
                )
            }
        },
        None => match process_event(&state.executor, &event).await {
            Ok(()) => Reply::new(StatusCode::OK, "processed", format!("processed {}", target)),
            Err(e) => Reply::new(StatusCode::OK, "failed", e.root_cause()),
        },
    }
}

fn respond(reply: Reply, event_id: String) -> Response {
    (
        reply.code,
        Json(WebhookResponse {
            status: reply.status,
            message: reply.message,
            event_id,
        }),
    )
        .into_response()
}
