//! LocalAI Auth Backend Library
//!
//! This library exports the core modules for the LocalAI auth server.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
