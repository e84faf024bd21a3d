//! HTTP query service
//!
//! A thin axum layer over [`QueryEngine`]: every query-bearing request checks
//! that the index exists and that the text model is started before searching.

mod error;
mod handlers;

pub use error::ApiError;

use crate::error::{Result, VisearchError};
use crate::search::{AvailabilityMonitor, QueryEngine};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: QueryEngine,
    pub monitor: AvailabilityMonitor,
    /// Root the `/image/...` route serves from
    pub images_root: PathBuf,
    /// Where uploaded query images are stored while they are embedded
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Build the router with all routes
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/image_search", post(handlers::image_search))
        .route("/similar_image", post(handlers::similar_image))
        .route("/image/{*path}", get(handlers::get_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let router = router(state);

    tracing::info!("Starting visearch query service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| VisearchError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await
        .map_err(|e| VisearchError::Server(format!("Server error: {}", e)))?;

    Ok(())
}
