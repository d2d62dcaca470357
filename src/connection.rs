//! One accepted WebSocket for one user, bridged to presence state.
//!
//! The channel is push-only: the session forwards payloads queued on its
//! handle to the socket and otherwise only watches for the socket to die.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::presence::{ConnectionHandle, ConnectionId, PresenceRegistry};
use crate::store::PresenceFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Why a session left the `Open` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    TransportError,
    WriteFailed,
    HeartbeatTimeout,
    /// A newer connection for the same user took over the presence entry.
    Replaced,
    /// Delivery dropped the entry after a failed push; nobody took over.
    Evicted,
    ServerShutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTuning {
    pub push_queue: usize,
    pub heartbeat_interval: Duration,
    /// Also bounds every socket write.
    pub client_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            push_queue: 64,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

impl From<&Settings> for SessionTuning {
    fn from(settings: &Settings) -> Self {
        Self {
            push_queue: settings.push_queue,
            heartbeat_interval: settings.heartbeat_interval,
            client_timeout: settings.client_timeout,
        }
    }
}

pub struct ConnectionSession {
    user_id: Uuid,
    connection_id: ConnectionId,
    outbox: mpsc::Receiver<String>,
    registry: PresenceRegistry,
    flags: Arc<dyn PresenceFlags>,
    tuning: SessionTuning,
    shutdown: CancellationToken,
    state: SessionState,
}

impl ConnectionSession {
    /// Register a freshly handshaken connection for `user_id` and mark the
    /// user online. The transport itself is handed over in [`Self::serve`].
    pub async fn attach(
        user_id: Uuid,
        registry: PresenceRegistry,
        flags: Arc<dyn PresenceFlags>,
        tuning: SessionTuning,
    ) -> Self {
        let (handle, outbox) = ConnectionHandle::new(tuning.push_queue);
        let mut session = Self {
            user_id,
            connection_id: handle.id(),
            outbox,
            registry,
            flags,
            tuning,
            shutdown: CancellationToken::new(),
            state: SessionState::Connecting,
        };

        {
            let _guard = session.registry.lock_user(user_id).await;
            session.registry.register(user_id, handle);
            session.state = SessionState::Open;

            if let Err(e) = session.flags.set_online(user_id, true).await {
                tracing::warn!(%user_id, error = %e, "failed to persist online status");
            }
        }

        tracing::info!(
            %user_id,
            connection_id = %session.connection_id,
            online = session.registry.len(),
            "connection session open"
        );
        session
    }

    /// End the session with [`CloseReason::ServerShutdown`] once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the transport until it closes, then run the close transition.
    pub async fn serve<W, R, E>(mut self, mut writer: W, mut reader: R) -> CloseReason
    where
        W: Sink<Message> + Unpin,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let mut heartbeat = tokio::time::interval(self.tuning.heartbeat_interval);
        heartbeat.tick().await;
        let mut last_seen = Instant::now();
        let shutdown = self.shutdown.clone();

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.write(&mut writer, Message::Close(None)).await;
                    break CloseReason::ServerShutdown;
                }
                push = self.outbox.recv() => match push {
                    Some(payload) => {
                        if !self.write(&mut writer, Message::Text(payload.into())).await {
                            break CloseReason::WriteFailed;
                        }
                    }
                    None => {
                        self.write(&mut writer, Message::Close(None)).await;
                        break self.lost_entry_reason();
                    }
                },
                frame = reader.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        last_seen = Instant::now();
                        tracing::debug!(
                            user_id = %self.user_id,
                            "ignoring inbound application frame"
                        );
                    }
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => {
                        tracing::debug!(user_id = %self.user_id, error = %e, "transport error");
                        break CloseReason::TransportError;
                    }
                },
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > self.tuning.client_timeout {
                        break CloseReason::HeartbeatTimeout;
                    }
                    if !self.write(&mut writer, Message::Ping(Vec::new().into())).await {
                        break CloseReason::WriteFailed;
                    }
                    tracing::trace!(connection_id = %self.connection_id, "sent ping");
                }
            }
        };

        self.close(reason).await;
        reason
    }

    /// Send one frame, giving up after `client_timeout`.
    async fn write<W>(&self, writer: &mut W, frame: Message) -> bool
    where
        W: Sink<Message> + Unpin,
    {
        matches!(
            tokio::time::timeout(self.tuning.client_timeout, writer.send(frame)).await,
            Ok(Ok(()))
        )
    }

    /// The outbox closed because our registry entry went away.
    fn lost_entry_reason(&self) -> CloseReason {
        match self.registry.lookup(self.user_id) {
            Some(handle) if handle.id() != self.connection_id => CloseReason::Replaced,
            _ => CloseReason::Evicted,
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.outbox.close();

        {
            let _guard = self.registry.lock_user(self.user_id).await;
            self.registry.deregister(self.user_id, self.connection_id);

            // A replacing session owns the flag now.
            if self.registry.lookup(self.user_id).is_none() {
                if let Err(e) = self.flags.set_online(self.user_id, false).await {
                    tracing::warn!(user_id = %self.user_id, error = %e, "failed to persist offline status");
                }
            }
        }

        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            ?reason,
            online = self.registry.len(),
            "connection session closed"
        );
    }
}
