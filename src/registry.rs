//! Connection registry (listening side)
//!
//! Tracks every live connection by identity. Shared by the per-connection
//! handler tasks (register/unregister) and the matchmaking actor (sends).
//!
//! Each registered connection gets a bounded outbound queue drained by its
//! own writer task. Sends only enqueue, so a peer that stops reading never
//! blocks the caller; once its queue is full the send fails with
//! `OutboundFull` and the peer can be evicted.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::ProtocolMessage;
use crate::types::ConnectionId;

/// Frames queued per connection before sends start failing
pub const OUTBOUND_QUEUE_SIZE: usize = 32;

/// A registered connection and its outbound queue
struct Entry {
    connection: Arc<Connection>,
    outbox: mpsc::Sender<ProtocolMessage>,
    writer: JoinHandle<()>,
}

impl Entry {
    async fn close(self) {
        self.writer.abort();
        self.connection.close().await;
    }
}

/// Thread-safe map of live connections
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, Entry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection under its own identity and start its writer task
    pub async fn register(&self, connection: Arc<Connection>) -> ConnectionId {
        let id = connection.id();
        let (outbox, queue) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let writer = tokio::spawn(write_loop(connection.clone(), queue));

        let mut map = self.connections.write().await;
        if let Some(previous) = map.insert(
            id,
            Entry {
                connection,
                outbox,
                writer,
            },
        ) {
            previous.writer.abort();
        }
        debug!(%id, total = map.len(), "Connection registered");
        id
    }

    /// Forget a connection, returning it if it was registered
    ///
    /// Frames already queued are still written.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut map = self.connections.write().await;
        let removed = map.remove(&id);
        if removed.is_some() {
            debug!(%id, total = map.len(), "Connection unregistered");
        }
        removed.map(|entry| entry.connection)
    }

    /// Forget a connection and close it, discarding anything still queued
    pub async fn evict(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id);
        match removed {
            Some(entry) => {
                debug!(%id, "Connection evicted");
                entry.close().await;
                true
            }
            None => false,
        }
    }

    /// Registered and not yet closed
    pub async fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections
            .read()
            .await
            .get(&id)
            .is_some_and(|entry| entry.connection.is_open())
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    /// Queue one message for one connection without waiting on the socket
    ///
    /// # Errors
    /// `PeerNotFound` if `id` is not registered or its writer has stopped,
    /// `NotConnected` if it was closed, `OutboundFull` if it is not keeping up.
    pub async fn send_to(
        &self,
        id: ConnectionId,
        message: ProtocolMessage,
    ) -> Result<(), ChatError> {
        let map = self.connections.read().await;
        let entry = map.get(&id).ok_or(ChatError::PeerNotFound(id))?;
        enqueue(id, entry, message)
    }

    /// Best-effort send to every registered connection
    ///
    /// Returns the failures; one failing peer never stops delivery to the others.
    pub async fn broadcast(&self, message: &ProtocolMessage) -> Vec<(ConnectionId, ChatError)> {
        let map = self.connections.read().await;
        map.iter()
            .filter_map(|(&id, entry)| match enqueue(id, entry, message.clone()) {
                Ok(()) => None,
                Err(e) => {
                    warn!(%id, error = %e, "Broadcast failed");
                    Some((id, e))
                }
            })
            .collect()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Close and forget every connection
    pub async fn close_all(&self) {
        let drained: Vec<Entry> = {
            let mut map = self.connections.write().await;
            map.drain().map(|(_, entry)| entry).collect()
        };
        join_all(drained.into_iter().map(Entry::close)).await;
    }
}

fn enqueue(id: ConnectionId, entry: &Entry, message: ProtocolMessage) -> Result<(), ChatError> {
    if !entry.connection.is_open() {
        return Err(ChatError::NotConnected);
    }
    entry.outbox.try_send(message).map_err(|e| match e {
        TrySendError::Full(_) => ChatError::OutboundFull(id),
        TrySendError::Closed(_) => ChatError::PeerNotFound(id),
    })
}

/// Drain one connection's queue onto its stream, in order
async fn write_loop(connection: Arc<Connection>, mut queue: mpsc::Receiver<ProtocolMessage>) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = connection.send(&message).await {
            debug!(id = %connection.id(), error = %e, "Writer stopped");
            break;
        }
    }
}
