//! User profile HTTP handlers
//!
//! Endpoints for the authenticated user's own account plus the
//! admin-only user search.

use axum::{
    extract::{Query, State},
    Json,
};
use validator::Validate;

use crate::error::ApiError;
use crate::handlers::{AdminUser, AuthenticatedUser};
use crate::models::{
    ChangePasswordRequest, MessageResponse, PaginatedResponse, SearchUsersQuery,
    UpdateProfileRequest, UserResponse, UserRole,
};
use crate::state::AppState;

/// GET /users/profile - Fetch the authenticated user's profile
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let profile = state.auth_service.get_user_by_id(user.user_id).await?;

    Ok(Json(profile.into()))
}

/// PUT /users/profile - Update username and/or email
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    req.validate()?;

    if req.username.is_none() && req.email.is_none() {
        return Err(ApiError::BadRequest("No updates provided".to_string()));
    }

    let updated = state.auth_service.update_profile(user.user_id, req).await?;

    Ok(Json(updated.into()))
}

/// POST /users/change-password - Change password with the current one
///
/// All refresh tokens are revoked; other devices must log in again.
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    req.validate()?;

    state
        .auth_service
        .change_password(user.user_id, &req.current_password, &req.new_password)
        .await?;

    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// DELETE /users/profile - Soft-delete the authenticated user's account
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth_service.soft_delete_account(user.user_id).await?;

    Ok(Json(MessageResponse::new("Account deactivated successfully")))
}

/// GET /users/search - Search users (admin only)
pub async fn search_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SearchUsersQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>, ApiError> {
    let role = match query.role.as_deref() {
        Some(raw) => Some(
            UserRole::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown role: {}", raw)))?,
        ),
        None => None,
    };

    let result = state
        .auth_service
        .search_users(
            query.q.as_deref(),
            role,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(20),
        )
        .await?;

    Ok(Json(result))
}
