//! Persist-then-push for outbound direct messages.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::presence::PresenceRegistry;
use crate::store::{MessageStore, PersistenceError, StoredMessage};

/// What happened to one push attempt. Never reported to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Absent,
    Failed,
}

#[derive(Clone)]
pub struct DeliveryRouter {
    store: Arc<dyn MessageStore>,
    registry: PresenceRegistry,
    push_timeout: Duration,
}

impl DeliveryRouter {
    pub fn new(store: Arc<dyn MessageStore>, registry: PresenceRegistry, push_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            push_timeout,
        }
    }

    /// Store the message, then push it to the recipient and echo it to the
    /// sender's own connection. Only a storage failure is an error; nothing
    /// is pushed in that case.
    pub async fn send(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> Result<StoredMessage, PersistenceError> {
        let message = self.store.append(sender_id, recipient_id, content).await?;

        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "failed to encode delivery payload");
                return Ok(message);
            }
        };

        let to_recipient = self.push(recipient_id, &payload).await;
        let to_sender = if sender_id == recipient_id {
            to_recipient
        } else {
            self.push(sender_id, &payload).await
        };

        tracing::debug!(
            message_id = %message.id,
            ?to_recipient,
            ?to_sender,
            "message stored"
        );
        Ok(message)
    }

    pub async fn history(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<Vec<StoredMessage>, PersistenceError> {
        self.store.history(user_a, user_b).await
    }

    async fn push(&self, user_id: Uuid, payload: &str) -> PushOutcome {
        let Some(handle) = self.registry.lookup(user_id) else {
            return PushOutcome::Absent;
        };

        match handle.push(payload.to_owned(), self.push_timeout).await {
            Ok(()) => PushOutcome::Delivered,
            Err(e) => {
                tracing::warn!(
                    %user_id,
                    connection_id = %handle.id(),
                    error = %e,
                    "push failed, dropping presence entry"
                );
                self.registry.deregister(user_id, handle.id());
                PushOutcome::Failed
            }
        }
    }
}
