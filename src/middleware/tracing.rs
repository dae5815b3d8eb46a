//! Request logging
//!
//! One line in, one line out, with latency. Only the path is logged,
//! never the query string; verification and reset links carry
//! single-use tokens as query parameters.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use super::client_ip;

/// Log request start and completion with timing
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health probes poll constantly; keep them out of the request log
    if path.ends_with("/health") {
        return next.run(request).await;
    }

    let client = client_ip(request.headers());
    let started = Instant::now();

    tracing::info!(%method, %path, client = ?client, "Request started");

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis();

    if status.is_server_error() {
        tracing::error!(%method, %path, status = status.as_u16(), latency_ms, "Request failed");
    } else if status.is_client_error() {
        tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, "Request rejected");
    } else {
        tracing::info!(%method, %path, status = status.as_u16(), latency_ms, "Request completed");
    }

    response
}
