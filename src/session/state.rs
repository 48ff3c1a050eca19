//! Per-connection state shared between the acceptor and the session handler.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::ConnectionId;

/// State of one accepted connection.
///
/// Created by the accept side and shared with the connection's handler.
/// The handler flips the terminal flag exactly once when it exits, on every
/// exit path; the accept side reads it to count live connections.
#[derive(Debug)]
pub struct ConnectionState {
    id: ConnectionId,
    label: String,
    terminated: AtomicBool,
}

impl ConnectionState {
    /// Create state for a new connection with a freshly allocated ID.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_id(ConnectionId::new(), label)
    }

    /// Create state with a specific ID.
    pub fn with_id(id: ConnectionId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            terminated: AtomicBool::new(false),
        }
    }

    /// Stable identifier of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Human-readable label, typically the peer address.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Mark the connection terminated.
    ///
    /// The transition is one-way. Returns `true` only for the call that
    /// performed it; later calls are no-ops.
    pub fn set_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    /// Whether the connection's handler has exited.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.label)
    }
}
