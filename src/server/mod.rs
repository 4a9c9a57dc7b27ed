//! Admin HTTP surface
//!
//! Every route lives under `/api/backups`. Authorization is expected to be
//! handled in front of this server.

pub mod error;
pub mod handlers;
pub mod state;

use std::future::Future;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Build the router with all backup routes
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/", get(handlers::list_backups).post(handlers::create_backup))
        .route("/stats", get(handlers::backup_stats))
        .route("/scheduler/status", get(handlers::scheduler_status))
        .route("/:name", delete(handlers::delete_backup))
        .route("/:name/verify", get(handlers::verify_backup))
        .route("/:name/download", get(handlers::download_backup))
        .route("/:name/restore", post(handlers::restore_backup))
        .with_state(state);

    Router::new()
        .nest("/api/backups", api_routes)
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "admin API listening on http://{}/api/backups", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
