use std::time::Instant;

use axum::http;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{info, warn};
use uuid::Uuid;

/// Correlates outbound platform calls with the webhook delivery that caused them.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags every outbound request with a request id and logs its outcome.
///
/// Clients set the header from the delivery's event id; requests without one
/// get a fresh UUID. Only the method, path, status and latency are logged, so
/// tokens never reach the log.
pub struct RequestIdMiddleware;

#[async_trait::async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let request_id = match req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => existing.to_string(),
            None => {
                let generated = Uuid::new_v4().to_string();
                if let Ok(value) = generated.parse() {
                    req.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                generated
            }
        };

        let method = req.method().clone();
        let path = req.url().path().to_string();
        let started = Instant::now();

        let response = next.run(req, extensions).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &response {
            Ok(resp) if resp.status().is_success() => info!(
                "[{}] {} {} -> {} ({} ms)",
                request_id,
                method,
                path,
                resp.status().as_u16(),
                elapsed_ms
            ),
            Ok(resp) => warn!(
                "[{}] {} {} -> {} ({} ms)",
                request_id,
                method,
                path,
                resp.status().as_u16(),
                elapsed_ms
            ),
            Err(e) => warn!(
                "[{}] {} {} failed after {} ms: {}",
                request_id, method, path, elapsed_ms, e
            ),
        }

        response
    }
}
