//! Session management module.
//!
//! Identity and state of accepted connections, the shared [`Session`]
//! handle, the events a session delivers, and the [`ClientRegistry`] of
//! live sessions.

mod handle;
mod id;
mod info;
mod message;
mod registry;
mod state;

pub use handle::{MessageCallback, Session};
pub use id::ConnectionId;
pub use info::ConnectionInfo;
pub use message::{
    CloseInfo, Message, OpenInfo, SessionEvent, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS,
};
pub use registry::ClientRegistry;
pub use state::ConnectionState;
