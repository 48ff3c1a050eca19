//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::session::{Message, Session};

/// Status of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    /// Raw session ID.
    pub session_id: u64,
    /// Display form of the ID (`conn-XXXXXXXX`).
    pub session_id_str: String,
    /// Upgrade handshake completed.
    pub established: bool,
    pub pong_enabled: bool,
    pub per_message_deflate: bool,
    /// A cooperative close was requested and is in progress.
    pub close_requested: bool,
}

impl SessionStatusResponse {
    pub fn from_session(session: &Session) -> Self {
        let id = session.id();
        Self {
            session_id: id.as_u64(),
            session_id_str: id.to_string(),
            established: session.is_established(),
            pong_enabled: session.is_pong_enabled(),
            per_message_deflate: session.is_per_message_deflate_enabled(),
            close_requested: session.is_close_requested(),
        }
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    pub sessions: Vec<SessionStatusResponse>,
}

/// Message to queue on one session or all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    /// Payload; sent as its UTF-8 bytes when `binary` is set.
    pub message: String,
    /// Send as a binary frame.
    #[serde(default)]
    pub binary: bool,
}

impl SendMessageRequest {
    pub fn into_message(self) -> Message {
        if self.binary {
            Message::Binary(self.message.into_bytes())
        } else {
            Message::Text(self.message)
        }
    }
}

/// Result of a broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResponse {
    /// Number of sessions the message was queued on.
    pub delivered: usize,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new("SESSION_NOT_FOUND", format!("Session '{}' not found", id))
    }

    pub fn session_closed(id: &str) -> Self {
        Self::new("SESSION_CLOSED", format!("Session '{}' is closing", id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}
