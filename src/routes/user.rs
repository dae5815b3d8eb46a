//! User profile routes

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::user;
use crate::state::AppState;

/// Create user profile routes
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/profile", get(user::get_profile))
        .route("/users/profile", put(user::update_profile))
        .route("/users/profile", delete(user::delete_account))
        .route("/users/change-password", post(user::change_password))
        .route("/users/search", get(user::search_users))
}
