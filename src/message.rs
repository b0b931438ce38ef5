//! Message protocol definitions
//!
//! JSON-based symmetric message protocol using Serde's adjacently tagged enum.
//! Every frame is `{"kind": ..., "data": ...}` and only `PartnerMessage`
//! carries `data`. The same type travels client → server and server → client.

use serde::{Deserialize, Serialize};

/// A single protocol message (one per wire frame)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ProtocolMessage {
    /// Peer is queued and waiting for a partner
    WaitingForPartner,
    /// Peer has been paired into a room
    PartnerConnected,
    /// The partner left the room
    PartnerDisconnected,
    /// The partner is typing
    PartnerTyping,
    /// A chat message from (or for) the partner
    PartnerMessage(String),
}

/// Payload-free discriminant of a `ProtocolMessage`, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    WaitingForPartner,
    PartnerConnected,
    PartnerDisconnected,
    PartnerTyping,
    PartnerMessage,
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::WaitingForPartner => MessageKind::WaitingForPartner,
            Self::PartnerConnected => MessageKind::PartnerConnected,
            Self::PartnerDisconnected => MessageKind::PartnerDisconnected,
            Self::PartnerTyping => MessageKind::PartnerTyping,
            Self::PartnerMessage(_) => MessageKind::PartnerMessage,
        }
    }

    /// The text payload, present only for `PartnerMessage`
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::PartnerMessage(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WaitingForPartner => "WaitingForPartner",
            Self::PartnerConnected => "PartnerConnected",
            Self::PartnerDisconnected => "PartnerDisconnected",
            Self::PartnerTyping => "PartnerTyping",
            Self::PartnerMessage => "PartnerMessage",
        };
        f.write_str(name)
    }
}
