//! Per-client rate limiting for the credential endpoints
//!
//! Token buckets keyed by client IP throttle password guessing before
//! it reaches the login guard. State is in-process only; it is a
//! best-effort brake, the durable lockout counter is the real defense.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;

use crate::error::ApiError;

use super::client_ip;

/// Refill state for one client
#[derive(Debug)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
}

/// Token-bucket limiter shared across the auth routes
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
    refill_per_second: f64,
    capacity: f64,
}

impl RateLimiter {
    /// Allow `requests_per_second` sustained, with bursts of twice that
    pub fn new(requests_per_second: u32) -> Self {
        let rate = f64::from(requests_per_second);
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            refill_per_second: rate,
            capacity: rate * 2.0,
        }
    }

    /// Take one token for `key`, refilling by elapsed time first
    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write().await;

        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            available: self.capacity,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.available = (bucket.available + elapsed * self.refill_per_second).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.available >= 1.0 {
            bucket.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle longer than `max_age`; called by the
    /// housekeeping task
    pub async fn cleanup(&self, max_age: std::time::Duration) {
        let now = Instant::now();
        self.buckets
            .write()
            .await
            .retain(|_, bucket| now.duration_since(bucket.refilled_at) < max_age);
    }
}

/// Build the middleware function enforcing `rate_limiter`
pub fn rate_limit_layer(
    rate_limiter: RateLimiter,
) -> impl Fn(
    Request<Body>,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone
       + Send {
    move |request: Request<Body>, next: Next| {
        let rate_limiter = rate_limiter.clone();
        Box::pin(async move {
            let key = client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());

            if !rate_limiter.check(&key).await {
                tracing::warn!(client = %key, "Rate limit exceeded");
                let mut response = ApiError::TooManyRequests.into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                return response;
            }

            next.run(request).await
        })
    }
}
