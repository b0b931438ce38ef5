//! Basic type definitions for the chat system
//!
//! Provides newtype wrappers and small value types:
//! - `ConnectionId`: UUID-based unique connection identifier
//! - `Direction`: which side of a conversation a message came from
//! - `HistoricMessage`: one entry of a session's transcript

use chrono::{DateTime, Local};
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4 generated when a connection is accepted or opened.
/// Identities are never reused, so a stale id can never address a new peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a message in a session transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written locally and sent to the partner
    Sent,
    /// Received from the partner
    Received,
}

/// A message in the local transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricMessage {
    pub direction: Direction,
    pub timestamp: DateTime<Local>,
    pub content: String,
}

impl HistoricMessage {
    /// A message written by this peer, stamped now
    pub fn sent(content: impl Into<String>) -> Self {
        Self {
            direction: Direction::Sent,
            timestamp: Local::now(),
            content: content.into(),
        }
    }

    /// A message written by the partner, stamped now
    pub fn received(content: impl Into<String>) -> Self {
        Self {
            direction: Direction::Received,
            timestamp: Local::now(),
            content: content.into(),
        }
    }

    /// Whether this peer wrote the message
    pub fn is_sender(&self) -> bool {
        self.direction == Direction::Sent
    }
}
