//! Read-only admin surface.
//!
//! # Responsibilities
//! - Report router status, per-endpoint health and cache counters as JSON
//! - Serve on a separate address until shutdown
//!
//! # Design Decisions
//! - Read-only: pool changes go through the config file
//! - Handlers share the running `Router` through axum state

pub mod handlers;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::handlers::*;
use crate::routing::Router as InferenceRouter;

pub fn setup_admin_router(router: Arc<InferenceRouter>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/cache", get(get_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

/// Bind `addr` and serve until shutdown.
pub async fn serve(
    addr: SocketAddr,
    router: Arc<InferenceRouter>,
    shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, router, shutdown).await
}

/// Serve on an already bound listener until shutdown.
pub async fn serve_on(
    listener: TcpListener,
    router: Arc<InferenceRouter>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin server listening");
    axum::serve(listener, setup_admin_router(router))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Admin server received shutdown signal");
        })
        .await
}
