//! Transport collaborators of the server.
//!
//! The server core only manages sessions; accepting sockets and speaking
//! the wire protocol happen behind two traits:
//!
//! - [`AcceptSource`] delivers accepted connections and stops on request.
//! - [`ProtocolEngine`] upgrades one connection and runs its receive loop.
//!
//! [`TcpAcceptor`] and [`TungsteniteEngine`] are the stock implementations.

pub mod accept;
pub mod engine;

pub use accept::{AcceptSource, Accepted, ListenConfig, TcpAcceptor};
pub use engine::{HandshakeStatus, ProtocolEngine, TungsteniteEngine};
