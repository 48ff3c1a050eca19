//! API router configuration.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    api_info, broadcast, close_session, get_session, health, list_sessions, send_message,
    AppState,
};
use crate::error::WsHubError;

/// Create the admin router over `state`.
pub fn create_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/", get(list_sessions))
        .route("/{id}", get(get_session).delete(close_session))
        .route("/{id}/send", post(send_message));

    let api_v1 = Router::new()
        .route("/", get(api_info))
        .route("/broadcast", post(broadcast))
        .nest("/sessions", session_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("admin API listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WsHubError::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}
