//! API handlers for the LocalAI backend

pub mod auth;
pub mod health;
pub mod user;

pub use auth::*;
pub use health::health_check;
pub use user::*;

// Re-export extractors from middleware for handler use
pub use crate::middleware::auth::{AdminUser, AuthenticatedUser};
