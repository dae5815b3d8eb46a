//! Health check handler

use axum::{extract::State, http::StatusCode, Json};

use crate::db;
use crate::state::AppState;

/// Health check response
#[derive(serde::Serialize)]
pub struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// GET /health - Liveness and database connectivity probe
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status, database) = match db::check_health(&state.db_pool).await {
        Ok(()) => (StatusCode::OK, "healthy", "connected"),
        Err(e) => {
            tracing::error!("Health check database ping failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
        }
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database: database.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
