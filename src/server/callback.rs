//! How messages of a new session get wired to the application.

use std::sync::Arc;

use crate::error::WsHubError;
use crate::session::{ConnectionInfo, ConnectionState, Session, SessionEvent};
use crate::Result;

/// Called once per new session; must register a message callback on the
/// session before returning.
pub type OnConnectionCallback =
    Arc<dyn Fn(&Arc<Session>, &Arc<ConnectionState>, ConnectionInfo) + Send + Sync>;

/// Called for every event of every session.
pub type OnClientMessageCallback =
    Arc<dyn Fn(&Arc<ConnectionState>, &ConnectionInfo, &Session, &SessionEvent) + Send + Sync>;

/// Wiring mode resolved for one connection.
#[derive(Clone)]
pub enum CallbackContract {
    /// Per-session callback responsible for registering a message handler.
    ConnectionScoped(OnConnectionCallback),
    /// One handler applied to every session's events.
    ServerScoped(OnClientMessageCallback),
    /// Nothing registered; every connection is refused.
    Unconfigured,
}

/// Misconfiguration detected while wiring a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    NoCallback,
    MissingMessageHandler,
}

impl ContractViolation {
    /// The two diagnostic lines reported for this violation.
    pub fn diagnostics(&self) -> [&'static str; 2] {
        match self {
            ContractViolation::NoCallback => [
                "application developer error: no server callback is registered",
                "missing call to set_on_connection_callback or set_on_client_message_callback",
            ],
            ContractViolation::MissingMessageHandler => [
                "application developer error: server callback improperly registered",
                "missing call to set_on_message_callback inside the connection callback",
            ],
        }
    }
}

impl CallbackContract {
    /// Resolve the wiring mode. A connection callback takes precedence over
    /// a server-wide message callback.
    pub fn resolve(
        on_connection: Option<OnConnectionCallback>,
        on_client_message: Option<OnClientMessageCallback>,
    ) -> Self {
        match (on_connection, on_client_message) {
            (Some(callback), _) => CallbackContract::ConnectionScoped(callback),
            (None, Some(callback)) => CallbackContract::ServerScoped(callback),
            (None, None) => CallbackContract::Unconfigured,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CallbackContract::ConnectionScoped(_) => "connection-scoped",
            CallbackContract::ServerScoped(_) => "server-scoped",
            CallbackContract::Unconfigured => "unconfigured",
        }
    }

    /// Wire `session` for message delivery.
    ///
    /// `info` is moved into the connection callback, or into the message
    /// handler registered on the application's behalf.
    pub fn apply(
        self,
        session: &Arc<Session>,
        state: &Arc<ConnectionState>,
        info: ConnectionInfo,
    ) -> std::result::Result<(), ContractViolation> {
        match self {
            CallbackContract::ConnectionScoped(on_connection) => {
                on_connection(session, state, info);
                if session.is_on_message_callback_registered() {
                    Ok(())
                } else {
                    Err(ContractViolation::MissingMessageHandler)
                }
            }
            CallbackContract::ServerScoped(on_client_message) => {
                let weak = Arc::downgrade(session);
                let state = Arc::clone(state);
                session.set_on_message_callback(move |event| {
                    if let Some(session) = weak.upgrade() {
                        on_client_message(&state, &info, &session, event);
                    }
                });
                Ok(())
            }
            CallbackContract::Unconfigured => Err(ContractViolation::NoCallback),
        }
    }
}

/// Callbacks registered on a server, each settable once.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    on_connection: Option<OnConnectionCallback>,
    on_client_message: Option<OnClientMessageCallback>,
}

impl CallbackSlots {
    pub(crate) fn set_on_connection(&mut self, callback: OnConnectionCallback) -> Result<()> {
        if self.on_connection.is_some() {
            return Err(WsHubError::CallbackAlreadySet("connection"));
        }
        self.on_connection = Some(callback);
        Ok(())
    }

    pub(crate) fn set_on_client_message(
        &mut self,
        callback: OnClientMessageCallback,
    ) -> Result<()> {
        if self.on_client_message.is_some() {
            return Err(WsHubError::CallbackAlreadySet("client message"));
        }
        self.on_client_message = Some(callback);
        Ok(())
    }

    /// Both modes registered; the server-wide callback will never run.
    pub(crate) fn is_ambiguous(&self) -> bool {
        self.on_connection.is_some() && self.on_client_message.is_some()
    }

    pub(crate) fn contract(&self) -> CallbackContract {
        CallbackContract::resolve(self.on_connection.clone(), self.on_client_message.clone())
    }
}
