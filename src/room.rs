//! Room struct definition
//!
//! The authoritative membership map. Each method is one complete
//! read-modify-write step; the room server applies them one at a time.
//! Nothing here awaits: outbound messages are only enqueued.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::client::Member;
use crate::error::{DeliveryError, JoinError};
use crate::message::ServerMessage;
use crate::types::ClientId;

/// The chat room
///
/// Keyed by name, so uniqueness is the map's own invariant. Names iterate
/// in sorted order, which keeps welcome lines deterministic.
#[derive(Debug, Default)]
pub struct Room {
    members: BTreeMap<String, Member>,
}

impl Room {
    /// Create an empty room
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `member` under its name
    ///
    /// On success the other members are told about the newcomer, the
    /// newcomer is sent the welcome line, and the names present before the
    /// insert are returned. A duplicate name leaves the room untouched.
    pub fn try_join(&mut self, mut member: Member) -> Result<Vec<String>, JoinError> {
        if self.contains(&member.name) {
            return Err(JoinError::DuplicateName(member.name));
        }

        let others = self.names();
        let name = member.name.clone();

        self.send_to_all_except(&name, ServerMessage::Joined { name: name.clone() });

        if let Err(e) = member.deliver(ServerMessage::Welcome {
            members: others.clone(),
        }) {
            log_delivery_failure(&name, e);
        }

        self.members.insert(name, member);
        Ok(others)
    }

    /// Remove `name` if `id` holds it, announcing the departure
    ///
    /// Returns false (and sends nothing) if the name is absent or belongs to
    /// another session.
    pub fn leave(&mut self, id: ClientId, name: &str) -> bool {
        if !self.is_held_by(id, name) {
            return false;
        }

        self.members.remove(name);
        self.send_to_all_except(
            name,
            ServerMessage::Left {
                name: name.to_string(),
            },
        );
        true
    }

    /// Relay `text` from `from` to every other member
    ///
    /// Returns false without sending if `from` is not (or no longer) a
    /// member held by `id`.
    pub fn broadcast(&mut self, id: ClientId, from: &str, text: &str) -> bool {
        if !self.is_held_by(id, from) {
            return false;
        }

        self.send_to_all_except(
            from,
            ServerMessage::Chat {
                from: from.to_string(),
                text: text.to_string(),
            },
        );
        true
    }

    /// Names of all current members, sorted
    pub fn names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Check if a name is currently taken
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Number of joined members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if nobody has joined
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn is_held_by(&self, id: ClientId, name: &str) -> bool {
        self.members.get(name).is_some_and(|m| m.id == id)
    }

    /// Enqueue `msg` for everyone except `skip` and members already kicked
    ///
    /// Failures stay per recipient.
    fn send_to_all_except(&mut self, skip: &str, msg: ServerMessage) {
        for (name, member) in self.members.iter_mut() {
            if name == skip || member.is_kicked() {
                continue;
            }
            if let Err(e) = member.deliver(msg.clone()) {
                log_delivery_failure(name, e);
            }
        }
    }
}

fn log_delivery_failure(name: &str, err: DeliveryError) {
    match err {
        DeliveryError::Full => warn!("Dropping slow client '{}': {}", name, err),
        DeliveryError::Closed => debug!("Skipping '{}': {}", name, err),
    }
}
