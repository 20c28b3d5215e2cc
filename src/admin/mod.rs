//! Read-only admin API.
//!
//! # Responsibilities
//! - Report version, backend, and live connection count
//! - List endpoints with their resolved pre-hooks and post-hooks

pub mod handlers;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/endpoints", get(get_endpoints))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `addr` until `shutdown` fires.
pub async fn serve_admin(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
