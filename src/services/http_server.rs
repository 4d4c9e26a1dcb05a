//! HTTP server hosting the reviewer API.

use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::services::http_api::{api_routes, ApiState};

/// Build the full router with request tracing.
pub fn build_router(state: ApiState) -> Router {
    api_routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `addr` until `state.shutdown` is cancelled.
///
/// In-flight requests are cancelled together with the shutdown token and
/// the server waits for them to finish before returning.
pub async fn serve(addr: SocketAddr, state: ApiState) -> Result<(), AppError> {
    let shutdown: CancellationToken = state.shutdown.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind to {}: {}", addr, e)))?;

    log::info!("[http] Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    log::info!("[http] Server stopped");
    Ok(())
}
