//! HTTP surface tests that run without a database
//!
//! The access gate is purely cryptographic, so the 401/403 paths, input
//! validation, and the error body contract are all testable against a
//! lazily-connecting pool that never reaches a server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use localai_server::auth::{issue_access_token, AuthService};
use localai_server::config::{Config, Environment};
use localai_server::handlers;
use localai_server::middleware::AuthenticatedUser;
use localai_server::models::{User, UserRole};
use localai_server::routes;
use localai_server::state::AppState;

const TEST_SECRET: &str = "api-surface-test-secret";

fn test_config() -> Config {
    Config {
        database_url: "postgresql://localhost:1/localai_unreachable".to_string(),
        environment: Environment::Development,
        port: 0,
        db_max_connections: 1,
        auth_rate_limit_rps: 1000,
        cors_allowed_origins: None,
        log_level: "error".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        access_token_ttl_seconds: 900,
        refresh_token_ttl_days: 7,
        lockout_threshold: 5,
        lockout_window_minutes: 15,
        reset_token_ttl_minutes: 60,
        operation_timeout_seconds: 3,
    }
}

fn test_state() -> AppState {
    let config = test_config();

    // Never connects; requests that reach the store fail fast
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy(&config.database_url)
        .expect("lazy pool");

    let auth_service = Arc::new(AuthService::new(pool.clone(), &config));
    AppState::new(pool, auth_service)
}

fn app() -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/health", get(handlers::health_check))
                .merge(routes::auth_routes())
                .merge(routes::user_routes()),
        )
        .with_state(test_state())
}

fn sample_user(role: UserRole) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        username: "surface_tester".to_string(),
        email: "surface@example.com".to_string(),
        password_hash: "$2b$12$placeholderplaceholderplaceholderplaceholde".to_string(),
        role,
        email_verified: true,
        verification_token: None,
        password_reset_token: None,
        password_reset_expires_at: None,
        failed_login_attempts: 0,
        locked_until: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn bearer(role: UserRole, ttl_seconds: i64) -> String {
    let user = sample_user(role);
    let (token, _) = issue_access_token(&user, TEST_SECRET, ttl_seconds).unwrap();
    format!("Bearer {}", token)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_token_rejected() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_malformed_and_expired_tokens_share_rejection() {
    // Garbage token
    let garbage = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/profile")
                .header(header::AUTHORIZATION, "Bearer not-a-real-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Properly signed but expired token
    let expired = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/profile")
                .header(header::AUTHORIZATION, bearer(UserRole::User, -3600))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);

    // One rejection class: same code, same message
    let garbage_body = body_json(garbage).await;
    let expired_body = body_json(expired).await;
    assert_eq!(garbage_body["error"]["code"], expired_body["error"]["code"]);
    assert_eq!(
        garbage_body["error"]["message"],
        expired_body["error"]["message"]
    );
}

#[tokio::test]
async fn test_wrong_auth_scheme_rejected() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/profile")
                .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_token_reaches_handler() {
    // Local route so the check stays store-free
    async fn whoami(user: AuthenticatedUser) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "user_id": user.user_id,
            "email": user.email,
            "role": user.role,
        }))
    }

    let app = Router::new()
        .route("/whoami", get(whoami))
        .with_state(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header(header::AUTHORIZATION, bearer(UserRole::User, 900))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"], "surface@example.com");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_admin_route_forbidden_for_user_role() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/search")
                .header(header::AUTHORIZATION, bearer(UserRole::User, 900))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_register_validation_failure_lists_fields() {
    let payload = serde_json::json!({
        "username": "ok_name",
        "email": "not-an-email",
        "password": "weak",
    });

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["email"].is_array());
    assert!(body["error"]["details"]["password"].is_array());
}

#[tokio::test]
async fn test_login_validation_rejects_empty_credentials() {
    let payload = serde_json::json!({
        "identifier": "",
        "password": "",
    });

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_health_degrades_without_leaking_cause() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "unreachable");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_store_failure_returns_generic_server_error() {
    // Shaped like a valid login, but the store is unreachable
    let payload = serde_json::json!({
        "email": "someone@example.com",
        "password": "Str0ng!pass",
    });

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    // The real cause goes to the logs, never to the caller
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"]["message"], "Internal server error");
}
