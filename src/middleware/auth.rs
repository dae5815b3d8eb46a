//! Authentication middleware
//!
//! Extractors that gate protected routes on a valid access token. The
//! check is purely cryptographic: signature plus expiry, no store
//! lookup, so revoking a refresh token never invalidates an access
//! token before its natural expiry.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{get_user_id_from_claims, verify_token, AuthService};
use crate::error::ApiError;
use crate::models::UserRole;

/// Authenticated user extracted from an access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

fn unauthorized(message: &str) -> Response {
    ApiError::Unauthorized(message.to_string()).into_response()
}

/// Extractor for authenticated users
///
/// Verifies the bearer token from the Authorization header. Every
/// failure mode answers with the same 401; callers cannot tell a
/// missing signature from an expired one.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(user: AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, user {}", user.user_id)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Extract the Authorization header
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| unauthorized("Authorization header with Bearer token required"))?;

        // Get the auth service from state
        let auth_service = Arc::<AuthService>::from_ref(state);

        // Verify the token signature and expiry. The rejection message
        // matches the login failure message so callers cannot tell the
        // failure classes apart.
        let claims = verify_token(bearer.token(), auth_service.jwt_secret())
            .map_err(|_| unauthorized("Invalid credentials"))?;

        let user_id = get_user_id_from_claims(&claims)
            .map_err(|_| unauthorized("Invalid credentials"))?;

        let role = UserRole::parse(&claims.role)
            .ok_or_else(|| unauthorized("Invalid credentials"))?;

        Ok(AuthenticatedUser {
            user_id,
            email: claims.email,
            role,
        })
    }
}

/// Extractor requiring the admin role
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !matches!(user.role, UserRole::Admin) {
            return Err(ApiError::Forbidden("Admin access required".to_string()).into_response());
        }

        Ok(AdminUser(user))
    }
}
