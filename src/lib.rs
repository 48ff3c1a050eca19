//! # ws-hub
//!
//! Session layer of a WebSocket server.
//!
//! Each accepted connection is run to completion by its own task: the
//! server's callback contract is checked, the session is registered, the
//! upgrade handshake runs under a deadline and, on success, the session's
//! receive loop delivers events to the application. The server keeps a
//! registry of live sessions and can be stopped in an orderly way.
//!
//! ## Callback modes
//!
//! - **Connection-scoped**: [`WebSocketServer::set_on_connection_callback`]
//!   is called for every new session and must register a message handler
//!   on it with [`Session::set_on_message_callback`].
//! - **Server-scoped**: [`WebSocketServer::set_on_client_message_callback`]
//!   receives the events of every session; the server wires it up itself.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ws_hub::{Message, ServerConfig, SessionEvent, WebSocketServer};
//!
//! #[tokio::main]
//! async fn main() -> ws_hub::Result<()> {
//!     ws_hub::logging::try_init().ok();
//!
//!     let server = WebSocketServer::new(ServerConfig::default());
//!     server.set_on_client_message_callback(|_state, _info, session, event| {
//!         if let SessionEvent::Message(Message::Text(text)) = event {
//!             let _ = session.send_text(text.clone());
//!         }
//!     })?;
//!
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, WsHubError};
pub use server::{CallbackContract, ServerConfig, WebSocketServer};
pub use session::{
    ClientRegistry, CloseInfo, ConnectionId, ConnectionInfo, ConnectionState, Message, OpenInfo,
    Session, SessionEvent,
};
pub use transport::{AcceptSource, HandshakeStatus, ProtocolEngine};
