//! Thread-safe set of live sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ConnectionId, Message, Session};
use crate::error::WsHubError;
use crate::Result;

/// Registry of connected clients.
///
/// Holds shared, non-owning membership: removing a session never tears it
/// down, that happens in the session's own task. Every operation takes the
/// single lock for the membership change only; callers that need to do
/// anything that may block on members work on a [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ConnectionId, Arc<Session>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ConnectionId, Arc<Session>>>> {
        self.clients.lock().map_err(|_| WsHubError::LockPoisoned)
    }

    /// Insert a session. Returns `false` if it was already a member.
    pub fn add(&self, session: Arc<Session>) -> Result<bool> {
        let mut clients = self.lock()?;
        let id = session.id();
        if clients.contains_key(&id) {
            return Ok(false);
        }
        clients.insert(id, session);
        Ok(true)
    }

    /// Remove a session. Returns whether it was a member.
    pub fn remove(&self, id: &ConnectionId) -> Result<bool> {
        let mut clients = self.lock()?;
        Ok(clients.remove(id).is_some())
    }

    /// Look up a member by ID.
    pub fn get(&self, id: &ConnectionId) -> Result<Option<Arc<Session>>> {
        let clients = self.lock()?;
        Ok(clients.get(id).cloned())
    }

    pub fn contains(&self, id: &ConnectionId) -> Result<bool> {
        let clients = self.lock()?;
        Ok(clients.contains_key(id))
    }

    /// Independent copy of the current membership.
    pub fn snapshot(&self) -> Result<Vec<Arc<Session>>> {
        let clients = self.lock()?;
        Ok(clients.values().cloned().collect())
    }

    /// Current membership size.
    pub fn count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Queue `message` on every member. Sends happen on a snapshot, outside
    /// the lock. Returns how many sessions accepted it.
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        let sessions = self.snapshot()?;
        Ok(sessions
            .iter()
            .filter(|session| session.send(message.clone()).is_ok())
            .count())
    }
}
