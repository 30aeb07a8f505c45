//! Load Balancer Revision Backend
//!
//! Tracks load balancer configurations of a remote control plane as numbered
//! revisions in SQLite and pushes stored revisions back on request.

mod api;
mod auth;
mod config;
mod db;
mod engine;
mod errors;
mod models;
mod remote;
mod scheduler;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use engine::Engine;
use remote::XcClient;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Load Balancer Revision Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!(
        "Control plane: {} (namespace {})",
        config.remote.base_url,
        config.remote.namespace
    );
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (LBREV_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool);

    // Remote client and engine
    let remote = Arc::new(XcClient::new(&config.remote)?);
    let engine = Arc::new(Engine::new(repo, remote));

    match config.snapshot_interval {
        Some(period) => {
            tracing::info!("Scheduled snapshots every {:?}", period);
            scheduler::spawn(engine.clone(), period);
        }
        None => tracing::info!("Scheduled snapshots disabled"),
    }

    // Create application state
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Snapshots
        .route("/snapshot", post(api::snapshot_all))
        .route("/{kind}/snapshot", post(api::snapshot_kind))
        // Rollback
        .route("/{kind}/replace-version", post(api::replace_version))
        // Remarks
        .route(
            "/{kind}/apps/{app}/{env}/revisions/{version}/remarks",
            put(api::update_remarks),
        )
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
