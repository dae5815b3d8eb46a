//! Authentication module for the LocalAI backend
//!
//! Provides credential and session security:
//! - Password hashing and verification (bcrypt)
//! - Short-lived JWT access tokens
//! - Opaque refresh tokens with single-use rotation
//! - Brute-force lockout on durable per-account counters
//! - Single-use email verification and password reset tokens

mod jwt;
mod login_guard;
mod password;
mod refresh_tokens;
mod service;

pub use jwt::{get_user_id_from_claims, issue_access_token, verify_token, Claims, JwtError};
pub use login_guard::{LockoutState, LoginGuard};
pub use refresh_tokens::{RedeemOutcome, RefreshTokenLedger};
pub use service::{AuthError, AuthService};
