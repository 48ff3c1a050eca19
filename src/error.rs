//! Error types for ws-hub.

use thiserror::Error;

/// Main error type for ws-hub operations.
#[derive(Error, Debug)]
pub enum WsHubError {
    /// A connection identifier could not be parsed.
    #[error("invalid connection id: {0}")]
    InvalidConnectionId(String),

    /// Session with the given ID is not in the client registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session has been closed or a close was requested.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// A server callback was registered twice.
    #[error("{0} callback is already set")]
    CallbackAlreadySet(&'static str),

    /// Server or acceptor was started while already running.
    #[error("already running")]
    AlreadyRunning,

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience Result type for ws-hub operations.
pub type Result<T> = std::result::Result<T, WsHubError>;
