//! Shared handle to one upgraded connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{ConnectionId, Message, SessionEvent};
use crate::error::WsHubError;
use crate::Result;

/// Callback receiving every event of one session.
pub type MessageCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// One live WebSocket session.
///
/// The handle is shared by the client registry and by the task running the
/// session. It carries the per-session options, the message-callback slot
/// and the cooperative close signal; the protocol engine itself stays owned
/// by the session's task and consults this handle.
pub struct Session {
    id: ConnectionId,
    on_message: Mutex<Option<MessageCallback>>,
    pong_enabled: AtomicBool,
    per_message_deflate: AtomicBool,
    auto_reconnect: AtomicBool,
    established: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<Message>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    close: CancellationToken,
}

impl Session {
    /// Create a session for the connection with the given ID.
    pub fn new(id: ConnectionId) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            id,
            on_message: Mutex::new(None),
            pong_enabled: AtomicBool::new(true),
            per_message_deflate: AtomicBool::new(true),
            auto_reconnect: AtomicBool::new(true),
            established: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            close: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Register the callback that receives this session's events.
    ///
    /// Meant to be called once, from the connection callback. A second call
    /// replaces the earlier callback and logs a warning.
    pub fn set_on_message_callback<F>(&self, callback: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_message.lock() {
            if slot.is_some() {
                warn!(id = %self.id, "replacing registered message callback");
            }
            *slot = Some(Arc::new(callback));
        }
    }

    /// Drop the registered callback, if any.
    pub fn clear_on_message_callback(&self) {
        if let Ok(mut slot) = self.on_message.lock() {
            slot.take();
        }
    }

    pub fn is_on_message_callback_registered(&self) -> bool {
        self.on_message
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Deliver an event to the registered callback.
    ///
    /// The callback runs outside the slot lock, so it may re-register or
    /// clear itself.
    pub fn dispatch(&self, event: &SessionEvent) {
        let callback = match self.on_message.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }

    pub fn enable_pong(&self) {
        self.pong_enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable_pong(&self) {
        self.pong_enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_pong_enabled(&self) -> bool {
        self.pong_enabled.load(Ordering::Relaxed)
    }

    pub fn enable_per_message_deflate(&self) {
        self.per_message_deflate.store(true, Ordering::Relaxed);
    }

    pub fn disable_per_message_deflate(&self) {
        self.per_message_deflate.store(false, Ordering::Relaxed);
    }

    pub fn is_per_message_deflate_enabled(&self) -> bool {
        self.per_message_deflate.load(Ordering::Relaxed)
    }

    /// Server-side sessions are passive and never reconnect.
    pub fn disable_automatic_reconnection(&self) {
        self.auto_reconnect.store(false, Ordering::Relaxed);
    }

    pub fn is_automatic_reconnection_enabled(&self) -> bool {
        self.auto_reconnect.load(Ordering::Relaxed)
    }

    /// Record that the upgrade handshake has succeeded. The server calls
    /// this before entering the receive loop.
    pub fn mark_established(&self) {
        self.established.store(true, Ordering::Release);
    }

    /// Whether the upgrade handshake has completed. Registry members that
    /// are still handshaking report `false`.
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Queue a message for delivery to the peer.
    ///
    /// Fails once a close was requested or the session's receive loop has
    /// ended.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        if self.close.is_cancelled() {
            return Err(WsHubError::SessionClosed(self.id.to_string()));
        }
        self.outbound_tx
            .send(message.into())
            .map_err(|_| WsHubError::SessionClosed(self.id.to_string()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Request a cooperative close.
    ///
    /// The receive loop notices the request, sends a close frame and returns
    /// on its own. Calling this more than once has no further effect.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Token cancelled by [`Session::close`], for the receive loop to watch.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Hand the outbound queue to the receive loop. Returns `None` after the
    /// first call.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.outbound_rx.lock().ok().and_then(|mut rx| rx.take())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("established", &self.is_established())
            .field("pong_enabled", &self.is_pong_enabled())
            .field("per_message_deflate", &self.is_per_message_deflate_enabled())
            .field("close_requested", &self.is_close_requested())
            .finish_non_exhaustive()
    }
}
