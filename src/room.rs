//! Room map definition
//!
//! A room pairs exactly two connections. It is stored as two reciprocal
//! entries (A → B and B → A) so either member finds its partner in O(1).

use std::collections::HashMap;

use crate::types::ConnectionId;

/// All active rooms, keyed by member
#[derive(Debug, Default, Clone)]
pub struct Rooms {
    partners: HashMap<ConnectionId, ConnectionId>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room for two unpaired connections
    ///
    /// Returns false (and changes nothing) if either is already paired
    /// or both ids are the same.
    pub fn pair(&mut self, a: ConnectionId, b: ConnectionId) -> bool {
        if a == b || self.contains(a) || self.contains(b) {
            return false;
        }
        self.partners.insert(a, b);
        self.partners.insert(b, a);
        true
    }

    /// Get the partner of a connection
    ///
    /// Returns None if the connection is not in a room.
    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.partners.get(&id).copied()
    }

    /// Check if a connection is in a room
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.partners.contains_key(&id)
    }

    /// Remove the room containing `id`, returning the partner
    ///
    /// Both directions are removed together.
    pub fn dissolve(&mut self, id: ConnectionId) -> Option<ConnectionId> {
        let partner = self.partners.remove(&id)?;
        self.partners.remove(&partner);
        Some(partner)
    }

    /// Number of rooms (not members)
    pub fn len(&self) -> usize {
        self.partners.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    /// Copy of the full partner map
    pub fn snapshot(&self) -> HashMap<ConnectionId, ConnectionId> {
        self.partners.clone()
    }

    /// Every entry points back at its key
    pub fn is_symmetric(&self) -> bool {
        self.partners
            .iter()
            .all(|(id, partner)| self.partners.get(partner) == Some(id))
    }
}
