//! Admin HTTP API for a running ws-hub server.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api/v1/` - API information
//!
//! ### Sessions
//! - `GET /api/v1/sessions` - List live sessions
//! - `GET /api/v1/sessions/{id}` - Get session status
//! - `DELETE /api/v1/sessions/{id}` - Request a cooperative close
//! - `POST /api/v1/sessions/{id}/send` - Queue a message on one session
//! - `POST /api/v1/broadcast` - Queue a message on every session
//!
//! ## Example
//!
//! ```no_run
//! use ws_hub::api::{serve, AppState};
//! use ws_hub::{ServerConfig, WebSocketServer};
//!
//! #[tokio::main]
//! async fn main() -> ws_hub::Result<()> {
//!     let server = WebSocketServer::new(ServerConfig::default());
//!     let state = AppState::new(server.registry());
//!     serve("127.0.0.1:8081".parse().unwrap(), state, std::future::pending()).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;

pub use handlers::AppState;
pub use router::{create_router, serve};
pub use types::{
    BroadcastResponse, ErrorResponse, ListSessionsResponse, SendMessageRequest,
    SessionStatusResponse,
};
