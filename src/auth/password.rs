//! Password hashing and verification
//!
//! bcrypt with a fixed cost factor, run on the blocking thread pool so
//! the async runtime is never stalled by a hash computation.

use thiserror::Error;

/// bcrypt cost factor for all new digests
pub const BCRYPT_COST: u32 = 12;

/// Well-formed digest that matches no issued password.
///
/// Verifying against it keeps the unknown-account login path as slow as
/// a real mismatch, so response timing does not reveal whether an
/// account exists.
const DUMMY_DIGEST: &str = "$2b$12$FPLROHcmnioPpiGMJxzetuAVPXMLnjOtW5aw9dJbrList9GJcX5Qy";

/// Password hashing errors
#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

/// Hash a plaintext password with the standard cost factor
pub async fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    let plaintext = plaintext.to_string();

    tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, BCRYPT_COST))
        .await
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a plaintext password against a stored digest
///
/// A malformed digest verifies as false rather than erroring, so a
/// corrupted row behaves like a wrong password.
pub async fn verify_password(plaintext: &str, digest: &str) -> bool {
    let plaintext = plaintext.to_string();
    let digest = digest.to_string();

    tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &digest).unwrap_or(false))
        .await
        .unwrap_or(false)
}

/// Burn one verification's worth of work against the dummy digest.
///
/// Called on login when no account matches the identifier; the result
/// is always a mismatch.
pub async fn verify_against_dummy(plaintext: &str) {
    let _ = verify_password(plaintext, DUMMY_DIGEST).await;
}
