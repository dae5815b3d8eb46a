//! Middleware for the LocalAI API
//!
//! Request tracing, per-IP rate limiting, security headers, and the
//! access-token gate.

use axum::http::HeaderMap;

pub mod auth;
mod rate_limiter;
mod security;
mod tracing;

pub use auth::{AdminUser, AuthenticatedUser};
pub use rate_limiter::{rate_limit_layer, RateLimiter};
pub use security::{hsts_header, security_headers};
pub use tracing::request_tracing;

/// Client address as reported by the reverse proxy.
///
/// The service binds to loopback behind a proxy, so the socket peer is
/// useless; X-Forwarded-For (first hop) and X-Real-IP are what identify
/// the caller.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
}
