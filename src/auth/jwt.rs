//! JWT access token generation and validation
//!
//! Access tokens are short-lived HS256 JWTs verified purely
//! cryptographically; refresh tokens are opaque and live in the
//! refresh token ledger, not here.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    /// Single rejection class for every verification failure.
    ///
    /// Expired, tampered, malformed, and wrong-key tokens are
    /// indistinguishable to the caller.
    #[error("Invalid or expired token")]
    InvalidToken,
}

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Account email
    pub email: String,
    /// User role
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Generate a signed access token for a user
///
/// Returns the encoded token together with its expiry instant.
pub fn issue_access_token(
    user: &User,
    secret: &str,
    ttl_seconds: i64,
) -> Result<(String, DateTime<Utc>), JwtError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(ttl_seconds);

    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        role: user.role.as_str().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::EncodingFailed(e.to_string()))?;

    Ok((token, exp))
}

/// Verify and decode an access token
///
/// Any failure, whatever its cause, reports the same [`JwtError::InvalidToken`].
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| JwtError::InvalidToken)
}

/// Extract the user ID from verified claims
pub fn get_user_id_from_claims(claims: &Claims) -> Result<Uuid, JwtError> {
    Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidToken)
}
