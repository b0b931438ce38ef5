//! Error types for the chat system
//!
//! Defines the transport, protocol and session errors shared by the
//! listening and connecting sides. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::ConnectionId;

/// Application-level errors
///
/// Only `Connection` is meant to reach the caller of `connect`; the others
/// are contained where they are detected and logged.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Stream could not be established (fatal to that connect call)
    #[error("Connection failed: {0}")]
    Connection(#[source] std::io::Error),

    /// IO error on an established stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Send targeted at an id that is not registered
    #[error("Peer not found: {0}")]
    PeerNotFound(ConnectionId),

    /// Peer is not draining its outbound queue
    #[error("Outbound queue full for {0}")]
    OutboundFull(ConnectionId),

    /// Frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Peer sent something its current state does not allow
    #[error("Protocol violation by {id}: {reason}")]
    ProtocolViolation {
        id: ConnectionId,
        reason: &'static str,
    },

    /// Operation attempted on a session that is not connected
    #[error("Not connected")]
    NotConnected,

    /// Connect attempted on a session that is already connected
    #[error("Already connected")]
    AlreadyConnected,

    /// The matchmaking actor is no longer running
    #[error("Matchmaking server closed")]
    ServerClosed,
}

/// Error returned by listener callbacks
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
