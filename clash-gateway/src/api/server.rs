//! HTTP server setup and routing
//!
//! Five routes over shared `AppState`. CORS is permissive: the gateway is
//! called by arbitrary browser frontends.

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use clash_common::{Error, Result};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the gateway router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/systems", get(super::handlers::systems))
        .route("/prebaked", get(super::handlers::prebaked))
        .route("/generate_battle", post(super::handlers::generate_battle))
        .route("/record_vote", post(super::handlers::record_vote))
        .route("/health_check", get(super::handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until shutdown.
pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {}: {}", addr, e)))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)))?;
    Ok(())
}
