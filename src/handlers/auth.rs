//! Authentication HTTP handlers
//!
//! Endpoints for registration, login, token rotation, and account
//! recovery.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::error::ApiError;
use crate::models::{
    AuthTokensResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
    RefreshTokenRequest, RegisterRequest, RegisterResponse, ResetPasswordRequest,
    VerifyEmailQuery,
};
use crate::state::AppState;

/// POST /auth/register - Create a new account
///
/// Responds 201 with the sanitized profile and the email verification
/// token; no session is issued until the caller logs in.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    req.validate()?;

    let response = state.auth_service.register(req).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Authenticate and issue a token pair
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    req.validate()?;

    let tokens = state
        .auth_service
        .login(&req.identifier, &req.password)
        .await?;

    Ok(Json(tokens))
}

/// POST /auth/refresh - Rotate a refresh token
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    let tokens = state.auth_service.refresh(&req.refresh_token).await?;

    Ok(Json(tokens))
}

/// POST /auth/logout - Revoke a refresh token
///
/// Responds 204 whether or not the token was live.
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<StatusCode, ApiError> {
    state.auth_service.logout(&req.refresh_token).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/verify-email - Consume an email verification token
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth_service.verify_email(&query.token).await?;

    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// POST /auth/forgot-password - Start a password reset
///
/// The response is identical whether or not the email matches an
/// account.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    req.validate()?;

    state.auth_service.forgot_password(&req.email).await?;

    Ok(Json(MessageResponse::new(
        "If the email is registered, a password reset link has been sent",
    )))
}

/// POST /auth/reset-password - Complete a password reset
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    req.validate()?;

    state
        .auth_service
        .reset_password(&req.token, &req.new_password)
        .await?;

    Ok(Json(MessageResponse::new("Password has been reset")))
}
