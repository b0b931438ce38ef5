//! Matchmaking state machine
//!
//! Pure decision logic: a FIFO wait queue plus the room map. Every
//! operation returns the deliveries it produced, in the order they must
//! be sent. The server actor applies them before handling anything else,
//! so "dequeue, pair, notify both" is never observed half done.
//!
//! Per-connection states:
//!
//! ```text
//! Unseen → Waiting → Paired → (Waiting | Gone)
//! ```

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, trace};

use crate::error::ChatError;
use crate::message::ProtocolMessage;
use crate::room::Rooms;
use crate::types::ConnectionId;

/// One message to send to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub message: ProtocolMessage,
}

impl Delivery {
    pub fn new(to: ConnectionId, message: ProtocolMessage) -> Self {
        Self { to, message }
    }
}

/// Wait queue and rooms
#[derive(Debug)]
pub struct Matchmaker {
    waiting: VecDeque<ConnectionId>,
    rooms: Rooms,
    /// Pair inside `connect`/`disconnect` instead of on an explicit `try_pair`
    eager: bool,
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

impl Matchmaker {
    /// Matchmaker that pairs as soon as two connections are waiting
    pub fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
            rooms: Rooms::new(),
            eager: true,
        }
    }

    /// Matchmaker that only pairs when `try_pair` is called
    pub fn deferred() -> Self {
        Self {
            eager: false,
            ..Self::new()
        }
    }

    /// A new connection arrived
    pub fn connect(&mut self, id: ConnectionId) -> Vec<Delivery> {
        let mut deliveries = self.enqueue(id);
        if self.eager {
            deliveries.extend(self.try_pair());
        }
        deliveries
    }

    /// Put a connection at the back of the queue and tell it so
    ///
    /// No-op for a connection that is already queued or paired.
    fn enqueue(&mut self, id: ConnectionId) -> Vec<Delivery> {
        if self.waiting.contains(&id) || self.rooms.contains(id) {
            debug!(%id, "Already queued or paired, not enqueuing");
            return Vec::new();
        }

        self.waiting.push_back(id);
        debug!(%id, waiting = self.waiting.len(), "Client waiting for partner");
        vec![Delivery::new(id, ProtocolMessage::WaitingForPartner)]
    }

    /// Pair the two oldest waiting connections, if there are two
    pub fn try_pair(&mut self) -> Vec<Delivery> {
        trace!("Trying to match clients");

        if self.waiting.len() < 2 {
            trace!("Not enough clients to match, skipping");
            return Vec::new();
        }

        let (Some(first), Some(second)) = (self.waiting.pop_front(), self.waiting.pop_front())
        else {
            return Vec::new();
        };

        self.rooms.pair(first, second);
        info!("Matched {} with {}", first, second);

        vec![
            Delivery::new(first, ProtocolMessage::PartnerConnected),
            Delivery::new(second, ProtocolMessage::PartnerConnected),
        ]
    }

    /// A connection went away
    ///
    /// Its partner, if any, is told and re-queued.
    pub fn disconnect(&mut self, id: ConnectionId) -> Vec<Delivery> {
        self.waiting.retain(|&waiting| waiting != id);

        let Some(partner) = self.rooms.dissolve(id) else {
            return Vec::new();
        };

        info!("Room of {} and {} closed, re-queuing {}", id, partner, partner);
        let mut deliveries = vec![Delivery::new(partner, ProtocolMessage::PartnerDisconnected)];
        deliveries.extend(self.connect(partner));
        deliveries
    }

    /// A frame arrived from a connection
    ///
    /// Chat messages from unpaired connections are a protocol violation;
    /// typing from unpaired connections is ignored.
    pub fn handle_message(
        &mut self,
        from: ConnectionId,
        message: ProtocolMessage,
    ) -> Result<Vec<Delivery>, ChatError> {
        match message {
            ProtocolMessage::PartnerMessage(text) => {
                if text.is_empty() {
                    debug!(id = %from, "Dropping empty message");
                    return Ok(Vec::new());
                }
                let partner = self.rooms.partner_of(from).ok_or(ChatError::ProtocolViolation {
                    id: from,
                    reason: "message from a client that is not in a room",
                })?;
                Ok(vec![Delivery::new(
                    partner,
                    ProtocolMessage::PartnerMessage(text),
                )])
            }
            ProtocolMessage::PartnerTyping => Ok(self
                .rooms
                .partner_of(from)
                .map(|partner| vec![Delivery::new(partner, ProtocolMessage::PartnerTyping)])
                .unwrap_or_default()),
            other => {
                debug!(id = %from, kind = %other.kind(), "Ignoring server-bound message");
                Ok(Vec::new())
            }
        }
    }

    /// Waiting connections, oldest first
    pub fn waiting(&self) -> Vec<ConnectionId> {
        self.waiting.iter().copied().collect()
    }

    pub fn rooms(&self) -> HashMap<ConnectionId, ConnectionId> {
        self.rooms.snapshot()
    }

    pub fn is_waiting(&self, id: ConnectionId) -> bool {
        self.waiting.contains(&id)
    }

    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.rooms.partner_of(id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ConnectionId> {
        (0..n).map(|_| ConnectionId::new()).collect()
    }

    /// Queue and room keys are disjoint and the room map is symmetric
    fn assert_invariants(matchmaker: &Matchmaker) {
        let rooms = matchmaker.rooms();
        for id in matchmaker.waiting() {
            assert!(!rooms.contains_key(&id), "{} both waiting and paired", id);
        }
        for (id, partner) in &rooms {
            assert_eq!(rooms.get(partner), Some(id));
        }
        let waiting = matchmaker.waiting();
        let mut unique = waiting.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), waiting.len(), "duplicate queue entry");
    }

    #[test]
    fn test_first_arrival_waits() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();

        let deliveries = matchmaker.connect(a);

        assert_eq!(
            deliveries,
            vec![Delivery::new(a, ProtocolMessage::WaitingForPartner)]
        );
        assert_eq!(matchmaker.waiting(), vec![a]);
        assert_invariants(&matchmaker);
    }

    #[test]
    fn test_second_arrival_pairs_both() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        matchmaker.connect(a);
        let deliveries = matchmaker.connect(b);

        assert_eq!(
            deliveries,
            vec![
                Delivery::new(b, ProtocolMessage::WaitingForPartner),
                Delivery::new(a, ProtocolMessage::PartnerConnected),
                Delivery::new(b, ProtocolMessage::PartnerConnected),
            ]
        );
        assert!(matchmaker.waiting().is_empty());
        assert_eq!(matchmaker.partner_of(a), Some(b));
        assert_eq!(matchmaker.partner_of(b), Some(a));
        assert_invariants(&matchmaker);
    }

    #[test]
    fn test_pairing_follows_arrival_order() {
        for n in 2..=9 {
            let mut matchmaker = Matchmaker::new();
            let arrivals = ids(n);
            for &id in &arrivals {
                matchmaker.connect(id);
                assert_invariants(&matchmaker);
            }

            for pair in arrivals.chunks(2) {
                match pair {
                    [a, b] => assert_eq!(matchmaker.partner_of(*a), Some(*b)),
                    [last] => assert_eq!(matchmaker.waiting(), vec![*last]),
                    _ => unreachable!(),
                }
            }
            assert_eq!(matchmaker.room_count(), n / 2);
            assert_eq!(matchmaker.waiting().len(), n % 2);
        }
    }

    #[test]
    fn test_try_pair_is_idempotent() {
        let mut matchmaker = Matchmaker::new();
        assert!(matchmaker.try_pair().is_empty());

        let a = ConnectionId::new();
        matchmaker.connect(a);
        assert!(matchmaker.try_pair().is_empty());
        assert_eq!(matchmaker.waiting(), vec![a]);
    }

    #[test]
    fn test_duplicate_connect_ignored() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        matchmaker.connect(a);

        assert!(matchmaker.connect(a).is_empty());
        assert_eq!(matchmaker.waiting(), vec![a]);
    }

    #[test]
    fn test_partner_disconnect_requeues_survivor() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        matchmaker.connect(a);
        matchmaker.connect(b);

        let deliveries = matchmaker.disconnect(a);

        assert_eq!(
            deliveries,
            vec![
                Delivery::new(b, ProtocolMessage::PartnerDisconnected),
                Delivery::new(b, ProtocolMessage::WaitingForPartner),
            ]
        );
        assert!(matchmaker.partner_of(b).is_none());
        assert_eq!(matchmaker.waiting(), vec![b]);
        assert!(matchmaker.rooms().is_empty());
        assert_invariants(&matchmaker);
    }

    #[test]
    fn test_requeued_survivor_pairs_with_waiting_peer() {
        let mut matchmaker = Matchmaker::new();
        let [a, b, c] = [ConnectionId::new(), ConnectionId::new(), ConnectionId::new()];
        matchmaker.connect(a);
        matchmaker.connect(b);
        matchmaker.connect(c);

        let deliveries = matchmaker.disconnect(a);

        // c has waited longer, so it is first in the new room
        assert_eq!(
            deliveries,
            vec![
                Delivery::new(b, ProtocolMessage::PartnerDisconnected),
                Delivery::new(b, ProtocolMessage::WaitingForPartner),
                Delivery::new(c, ProtocolMessage::PartnerConnected),
                Delivery::new(b, ProtocolMessage::PartnerConnected),
            ]
        );
        assert_eq!(matchmaker.partner_of(b), Some(c));
        assert_invariants(&matchmaker);
    }

    #[test]
    fn test_waiting_disconnect_leaves_queue() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        matchmaker.connect(a);

        assert!(matchmaker.disconnect(a).is_empty());
        assert!(matchmaker.waiting().is_empty());

        // Unknown ids are a no-op
        assert!(matchmaker.disconnect(ConnectionId::new()).is_empty());
    }

    #[test]
    fn test_message_relayed_to_partner_only() {
        let mut matchmaker = Matchmaker::new();
        let [a, b, c] = [ConnectionId::new(), ConnectionId::new(), ConnectionId::new()];
        matchmaker.connect(a);
        matchmaker.connect(b);
        matchmaker.connect(c);

        let deliveries = matchmaker
            .handle_message(a, ProtocolMessage::PartnerMessage("abc".to_string()))
            .unwrap();

        assert_eq!(
            deliveries,
            vec![Delivery::new(
                b,
                ProtocolMessage::PartnerMessage("abc".to_string())
            )]
        );
    }

    #[test]
    fn test_message_from_unpaired_is_violation() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        matchmaker.connect(a);

        let result =
            matchmaker.handle_message(a, ProtocolMessage::PartnerMessage("hello".to_string()));
        assert!(matches!(
            result,
            Err(ChatError::ProtocolViolation { id, .. }) if id == a
        ));
    }

    #[test]
    fn test_empty_message_dropped() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        matchmaker.connect(a);
        matchmaker.connect(b);

        let deliveries = matchmaker
            .handle_message(a, ProtocolMessage::PartnerMessage(String::new()))
            .unwrap();
        assert!(deliveries.is_empty());
    }

    #[test]
    fn test_typing_relay() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        matchmaker.connect(a);

        // Unpaired typing is silently ignored
        assert!(matchmaker
            .handle_message(a, ProtocolMessage::PartnerTyping)
            .unwrap()
            .is_empty());

        matchmaker.connect(b);
        assert_eq!(
            matchmaker
                .handle_message(b, ProtocolMessage::PartnerTyping)
                .unwrap(),
            vec![Delivery::new(a, ProtocolMessage::PartnerTyping)]
        );
    }

    #[test]
    fn test_server_bound_kinds_ignored() {
        let mut matchmaker = Matchmaker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        matchmaker.connect(a);
        matchmaker.connect(b);

        for message in [
            ProtocolMessage::WaitingForPartner,
            ProtocolMessage::PartnerConnected,
            ProtocolMessage::PartnerDisconnected,
        ] {
            assert!(matchmaker.handle_message(a, message).unwrap().is_empty());
        }
        assert_eq!(matchmaker.partner_of(a), Some(b));
    }

    #[test]
    fn test_deferred_pairs_only_on_try_pair() {
        let mut matchmaker = Matchmaker::deferred();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        matchmaker.connect(a);
        let deliveries = matchmaker.connect(b);
        assert_eq!(
            deliveries,
            vec![Delivery::new(b, ProtocolMessage::WaitingForPartner)]
        );
        assert_eq!(matchmaker.waiting(), vec![a, b]);

        let deliveries = matchmaker.try_pair();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(matchmaker.partner_of(a), Some(b));
        assert_invariants(&matchmaker);
    }

    #[test]
    fn test_churn_keeps_invariants() {
        let mut matchmaker = Matchmaker::new();
        let peers = ids(12);

        for &id in &peers {
            matchmaker.connect(id);
            assert_invariants(&matchmaker);
        }
        // Drop every third peer, paired or not
        for &id in peers.iter().step_by(3) {
            matchmaker.disconnect(id);
            assert_invariants(&matchmaker);
            assert!(!matchmaker.is_waiting(id));
            assert!(matchmaker.partner_of(id).is_none());
        }

        let remaining = peers.len() - peers.iter().step_by(3).count();
        assert_eq!(
            matchmaker.room_count() * 2 + matchmaker.waiting().len(),
            remaining
        );
        assert!(matchmaker.waiting().len() <= 1);
    }
}
