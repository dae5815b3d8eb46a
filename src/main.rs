//! LocalAI Auth Backend Server
//!
//! This is the account and session backend for LocalAI: registration,
//! login with lockout protection, access/refresh token rotation, and
//! password recovery, backed by Postgres.

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use localai_server::auth::AuthService;
use localai_server::config::Config;
use localai_server::middleware::RateLimiter;
use localai_server::state::AppState;
use localai_server::{db, handlers, middleware, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration errors are fatal before logging is up
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting LocalAI auth server"
    );

    if config.uses_fallback_secret() {
        tracing::warn!("JWT_SECRET not set, using the development fallback secret");
    }

    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let auth_service = Arc::new(AuthService::new(db_pool.clone(), &config));
    let app_state = AppState::new(db_pool.clone(), auth_service.clone());

    // Throttles the credential endpoints only
    let rate_limiter = RateLimiter::new(config.auth_rate_limit_rps);

    // Start housekeeping in background: purge expired refresh tokens and
    // drop idle rate limiter buckets
    let purge_service = auth_service.clone();
    let purge_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        tracing::info!("Housekeeping task started");
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match purge_service.purge_expired_tokens().await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "Purged expired refresh tokens");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Refresh token purge failed: {}", e),
            }
            purge_limiter.cleanup(Duration::from_secs(3600)).await;
        }
    });

    let auth_rate_limiter = rate_limiter.clone();

    // Create the app router
    let api = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(
            routes::auth_routes().layer(axum::middleware::from_fn(move |req, next| {
                let limiter = auth_rate_limiter.clone();
                middleware::rate_limit_layer(limiter)(req, next)
            })),
        )
        .merge(routes::user_routes());

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/v1", api)
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(&config));

    // HSTS only makes sense behind TLS
    let app = if config.environment.is_production() {
        app.layer(axum::middleware::from_fn(middleware::hsts_header))
    } else {
        app
    };

    // Loopback only; TLS and the public address belong to the proxy
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn root() -> &'static str {
    "LocalAI API Server"
}

fn configure_cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.parse().ok()).flatten()
        })
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
