//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::types::{
    BroadcastResponse, ErrorResponse, ListSessionsResponse, SendMessageRequest,
    SessionStatusResponse,
};
use crate::session::{ClientRegistry, ConnectionId, Session};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Shared application state.
#[derive(Clone, Default)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }
}

fn internal(e: impl ToString) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::internal_error(e.to_string())),
    )
}

/// Accepts both `conn-0000002a` and the raw decimal `42`.
fn parse_id(raw: &str) -> Result<ConnectionId, ApiError> {
    raw.parse::<ConnectionId>()
        .or_else(|e| raw.parse::<u64>().map(ConnectionId::from_raw).map_err(|_| e))
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::bad_request(e.to_string())),
            )
        })
}

/// Established session by id; members still handshaking are not visible.
fn find(state: &AppState, raw: &str) -> Result<Arc<Session>, ApiError> {
    let id = parse_id(raw)?;
    let session = state.registry.get(&id).map_err(internal)?;
    session.filter(|s| s.is_established()).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::session_not_found(raw)),
        )
    })
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "ws-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List all live sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let mut sessions: Vec<_> = state
        .registry
        .snapshot()
        .map_err(internal)?
        .iter()
        .filter(|session| session.is_established())
        .map(|session| SessionStatusResponse::from_session(session))
        .collect();
    sessions.sort_by_key(|s| s.session_id);

    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// Get session status.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session = find(&state, &session_id)?;
    Ok(Json(SessionStatusResponse::from_session(&session)))
}

/// Request a cooperative close. The session leaves the registry once its
/// task has finished.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = find(&state, &session_id)?;
    session.close();
    info!(id = %session.id(), "close requested through admin API");
    Ok(StatusCode::ACCEPTED)
}

/// Queue a message on one session.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<StatusCode, ApiError> {
    let session = find(&state, &session_id)?;
    session.send(req.into_message()).map_err(|e| {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse::session_closed(&session_id).with_details(e.to_string())),
        )
    })?;
    Ok(StatusCode::ACCEPTED)
}

/// Queue a message on every registry member, including sessions still
/// handshaking.
pub async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let delivered = state
        .registry
        .broadcast(&req.into_message())
        .map_err(internal)?;
    Ok(Json(BroadcastResponse { delivered }))
}
