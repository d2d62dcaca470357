//! Process-wide map from user identity to that user's live connection.
//!
//! The registry is the only authority on "is this user reachable right now".
//! The persisted online flag is a display cache and is never consulted here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Identifies one accepted connection. Two connections for the same user
/// never share an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(Uuid::now_v7())
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushFailure {
    #[error("connection closed")]
    Closed,

    #[error("push timed out")]
    TimedOut,
}

/// Write side of a live connection. Cloning shares the same outbox.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Create a handle and the outbox its session drains into the socket.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a payload for the socket, waiting at most `timeout` for room.
    pub async fn push(&self, payload: String, timeout: Duration) -> Result<(), PushFailure> {
        self.tx
            .send_timeout(payload, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => PushFailure::TimedOut,
                mpsc::error::SendTimeoutError::Closed(_) => PushFailure::Closed,
            })
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    entries: Arc<DashMap<Uuid, ConnectionHandle>>,
    user_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`. The replaced handle is
    /// dropped, which closes its session's outbox once no push holds a clone.
    pub fn register(&self, user_id: Uuid, handle: ConnectionHandle) {
        let connection_id = handle.id();
        if let Some(old) = self.entries.insert(user_id, handle) {
            tracing::debug!(
                %user_id,
                old = %old.id(),
                new = %connection_id,
                "presence entry replaced"
            );
        }
    }

    /// Remove the entry for `user_id` only if it still belongs to `connection_id`.
    /// Returns whether anything was removed.
    pub fn deregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        self.entries
            .remove_if(&user_id, |_, handle| handle.id() == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.entries.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Serializes one user's register/deregister and the online-flag write
    /// that follows it, so a reconnect never races a closing session's write.
    pub async fn lock_user(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.user_locks.entry(user_id).or_default().clone();
        lock.lock_owned().await
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
