//! Metadata about an accepted connection.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Immutable facts about an accepted transport connection.
///
/// Deliberately not `Clone`: it is moved into the connection callback (or
/// into the auto-registered message handler) exactly once.
#[derive(Debug)]
pub struct ConnectionInfo {
    remote_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    accepted_at: Instant,
}

impl ConnectionInfo {
    pub fn new(remote_addr: SocketAddr, local_addr: Option<SocketAddr>) -> Self {
        Self {
            remote_addr,
            local_addr,
            accepted_at: Instant::now(),
        }
    }

    /// Peer socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_addr.port()
    }

    /// Local address the connection was accepted on, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// When the acceptor handed the connection over.
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let remote: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        let local: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let info = ConnectionInfo::new(remote, Some(local));

        assert_eq!(info.remote_addr(), remote);
        assert_eq!(info.remote_ip().to_string(), "192.168.1.20");
        assert_eq!(info.remote_port(), 51234);
        assert_eq!(info.local_addr(), Some(local));
        assert!(info.accepted_at() <= Instant::now());
    }
}
