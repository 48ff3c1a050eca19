//! WebSocket server: callback wiring, per-connection handling and the
//! start/stop lifecycle.

mod callback;
mod handler;
mod lifecycle;

pub use callback::{
    CallbackContract, ContractViolation, OnClientMessageCallback, OnConnectionCallback,
};
pub use lifecycle::{ServerConfig, WebSocketServer, DEFAULT_HANDSHAKE_TIMEOUT};
