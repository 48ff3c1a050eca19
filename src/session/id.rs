//! Connection identifier type.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for connection ID generation.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection and the session it carries.
///
/// IDs come from a process-wide atomic counter and are displayed as
/// `conn-XXXXXXXX` where X is a hexadecimal digit. A session takes the ID
/// of the connection state it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next unique connection ID.
    pub fn new() -> Self {
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a ConnectionId from a raw u64 value.
    ///
    /// Used by lookups coming from the admin API and by tests.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:08x}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = crate::error::WsHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("conn-")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(ConnectionId)
            .ok_or_else(|| crate::error::WsHubError::InvalidConnectionId(s.into()))
    }
}
