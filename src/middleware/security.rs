//! Security response headers
//!
//! Every response from this API carries tokens or account data, so the
//! baseline set forbids caching, framing, and MIME sniffing. HSTS is a
//! separate layer because it only belongs behind TLS.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Baseline headers attached to every response
const BASELINE_HEADERS: &[(HeaderName, &str)] = &[
    (axum::http::header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (axum::http::header::X_FRAME_OPTIONS, "DENY"),
    (
        axum::http::header::REFERRER_POLICY,
        "strict-origin-when-cross-origin",
    ),
    (
        axum::http::header::CONTENT_SECURITY_POLICY,
        "default-src 'self'; frame-ancestors 'none'",
    ),
    // Token-bearing responses must never land in a shared cache
    (axum::http::header::CACHE_CONTROL, "no-store"),
];

/// Attach the baseline security headers to the response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    for (name, value) in BASELINE_HEADERS {
        headers.insert(name.clone(), HeaderValue::from_static(value));
    }

    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    response
}

/// Attach the HSTS header; layered only in production where TLS is
/// terminated in front of the service
pub async fn hsts_header(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        axum::http::header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    response
}
