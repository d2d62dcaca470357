//! Contracts the delivery core consumes from persistence.
//!
//! The SQLite implementation lives in [`crate::db`]; tests plug in their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A message as it exists after it has been durably written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<uuid::Error> for PersistenceError {
    fn from(e: uuid::Error) -> Self {
        PersistenceError::Corrupt(e.to_string())
    }
}

impl From<time::error::ComponentRange> for PersistenceError {
    fn from(e: time::error::ComponentRange) -> Self {
        PersistenceError::Corrupt(e.to_string())
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably write a message and return it with its generated id and timestamp.
    async fn append(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> Result<StoredMessage, PersistenceError>;

    /// Every message between `user_a` and `user_b`, oldest first.
    /// `history(a, b)` and `history(b, a)` return the same sequence.
    async fn history(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<Vec<StoredMessage>, PersistenceError>;
}

/// The persisted "online" flag on a user record.
#[async_trait]
pub trait PresenceFlags: Send + Sync {
    async fn set_online(&self, user_id: Uuid, online: bool) -> Result<(), PersistenceError>;
}
