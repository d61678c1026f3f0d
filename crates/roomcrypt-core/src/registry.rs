//! Session registry.
//!
//! In-memory record of the current outbound session per room and every known
//! inbound session. No network or policy logic lives here.
//!
//! The registry is loaded once from the [`Store`] and then split: the
//! outbound half moves into the encrypting worker and the inbound half into
//! the decrypting worker. Each half has exactly one owner, so all mutation is
//! serialized by that owner's task queue.
//!
//! # Invariants
//!
//! - At most one outbound session per room.
//! - An installed inbound record is only replaced by one whose
//!   `first_known_index` is strictly earlier.

use std::collections::HashMap;

use roomcrypt_proto::{Curve25519Key, RoomId, SessionId};

use crate::{
    error::StorageError,
    session::{InboundGroupSession, InboundSessionKey, OutboundGroupSession},
    store::Store,
};

/// Current outbound session of each room.
#[derive(Debug, Default)]
pub struct OutboundSessions {
    by_room: HashMap<RoomId, OutboundGroupSession>,
}

impl OutboundSessions {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session of `room_id`.
    pub fn get(&self, room_id: &RoomId) -> Option<&OutboundGroupSession> {
        self.by_room.get(room_id)
    }

    /// Current session of `room_id`, mutable.
    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut OutboundGroupSession> {
        self.by_room.get_mut(room_id)
    }

    /// Make `session` the current one for its room, returning the superseded
    /// session.
    pub fn replace(&mut self, session: OutboundGroupSession) -> Option<OutboundGroupSession> {
        self.by_room.insert(session.room_id().clone(), session)
    }

    /// Drop the current session of `room_id`.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<OutboundGroupSession> {
        self.by_room.remove(room_id)
    }

    /// Number of rooms with a current session.
    pub fn len(&self) -> usize {
        self.by_room.len()
    }

    /// True if no room has a session.
    pub fn is_empty(&self) -> bool {
        self.by_room.is_empty()
    }
}

/// What installing an inbound key would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No record existed
    Installed,
    /// The new key starts earlier and replaces the record
    Replaced {
        /// First index of the replaced record
        previous_index: u32,
    },
    /// The existing record starts at or before the new key; nothing changes
    KeptExisting {
        /// First index of the kept record
        existing_index: u32,
    },
}

impl InstallOutcome {
    /// True if the registry (and engine) should take the new key.
    pub fn applies(self) -> bool {
        !matches!(self, Self::KeptExisting { .. })
    }
}

/// Every known inbound session.
#[derive(Debug, Default)]
pub struct InboundSessions {
    by_key: HashMap<InboundSessionKey, InboundGroupSession>,
}

impl InboundSessions {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `key`.
    pub fn get(&self, key: &InboundSessionKey) -> Option<&InboundGroupSession> {
        self.by_key.get(key)
    }

    /// True if a record exists for `key`.
    pub fn contains(&self, key: &InboundSessionKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Decide whether a key starting at `first_known_index` should replace
    /// what is installed. Pure; nothing is modified.
    pub fn plan_install(&self, key: &InboundSessionKey, first_known_index: u32) -> InstallOutcome {
        match self.by_key.get(key) {
            None => InstallOutcome::Installed,
            Some(existing) if existing.first_known_index <= first_known_index => {
                InstallOutcome::KeptExisting { existing_index: existing.first_known_index }
            },
            Some(existing) => {
                InstallOutcome::Replaced { previous_index: existing.first_known_index }
            },
        }
    }

    /// Store `session`, returning any record it replaced.
    ///
    /// Callers check [`Self::plan_install`] first.
    pub fn insert(&mut self, session: InboundGroupSession) -> Option<InboundGroupSession> {
        debug_assert!(self.plan_install(&session.key(), session.first_known_index).applies());
        self.by_key.insert(session.key(), session)
    }

    /// Drop the record for `key`.
    pub fn remove(&mut self, key: &InboundSessionKey) -> Option<InboundGroupSession> {
        self.by_key.remove(key)
    }

    /// Any record for `(sender_key, session_id)`, whatever its room.
    pub fn find_any_room(
        &self,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> Option<&InboundGroupSession> {
        self.by_key.values().find(|s| &s.sender_key == sender_key && &s.session_id == session_id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// True if no records exist.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Records belonging to `room_id`.
    pub fn for_room<'a>(
        &'a self,
        room_id: &'a RoomId,
    ) -> impl Iterator<Item = &'a InboundGroupSession> + 'a {
        self.by_key.values().filter(move |s| &s.room_id == room_id)
    }
}

/// Both halves of the registry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Outbound half
    pub outbound: OutboundSessions,
    /// Inbound half
    pub inbound: InboundSessions,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every persisted record.
    ///
    /// If the store holds two outbound sessions for one room, the newer one
    /// wins. Duplicate inbound records keep the one with the earliest first
    /// index.
    pub fn load<S: Store>(store: &S) -> Result<Self, StorageError> {
        let mut registry = Self::new();

        for session in store.load_outbound_sessions()? {
            let newer = registry
                .outbound
                .get(session.room_id())
                .is_none_or(|current| current.created_at_ms() <= session.created_at_ms());
            if newer {
                registry.outbound.replace(session);
            }
        }

        for session in store.load_inbound_sessions()? {
            if registry.inbound.plan_install(&session.key(), session.first_known_index).applies() {
                registry.inbound.insert(session);
            }
        }

        Ok(registry)
    }

    /// Split into the halves owned by the encrypting and decrypting workers.
    pub fn into_parts(self) -> (OutboundSessions, InboundSessions) {
        (self.outbound, self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn inbound(first_known_index: u32) -> InboundGroupSession {
        InboundGroupSession {
            session_id: SessionId::from("s1"),
            sender_key: Curve25519Key::from("alice-curve"),
            room_id: RoomId::from("!r:x"),
            forwarding_chain: vec![],
            claimed_keys: BTreeMap::new(),
            export_format: false,
            first_known_index,
        }
    }

    #[test]
    fn first_install_applies() {
        let sessions = InboundSessions::new();
        assert_eq!(sessions.plan_install(&inbound(5).key(), 5), InstallOutcome::Installed);
    }

    #[test]
    fn later_index_never_regresses_existing() {
        let mut sessions = InboundSessions::new();
        sessions.insert(inbound(2));

        assert_eq!(
            sessions.plan_install(&inbound(7).key(), 7),
            InstallOutcome::KeptExisting { existing_index: 2 }
        );
        // Same index again is a duplicate announcement
        assert_eq!(
            sessions.plan_install(&inbound(2).key(), 2),
            InstallOutcome::KeptExisting { existing_index: 2 }
        );
    }

    #[test]
    fn earlier_index_replaces() {
        let mut sessions = InboundSessions::new();
        sessions.insert(inbound(7));

        let outcome = sessions.plan_install(&inbound(0).key(), 0);
        assert_eq!(outcome, InstallOutcome::Replaced { previous_index: 7 });

        let previous = sessions.insert(inbound(0));
        assert_eq!(previous.map(|s| s.first_known_index), Some(7));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn for_room_filters() {
        let mut sessions = InboundSessions::new();
        sessions.insert(inbound(0));
        let mut other = inbound(0);
        other.room_id = RoomId::from("!other:x");
        sessions.insert(other);

        assert_eq!(sessions.for_room(&RoomId::from("!r:x")).count(), 1);
    }

    #[test]
    fn find_any_room_ignores_room() {
        let mut sessions = InboundSessions::new();
        let mut record = inbound(0);
        record.room_id = RoomId::from("!elsewhere:x");
        sessions.insert(record);

        let found =
            sessions.find_any_room(&Curve25519Key::from("alice-curve"), &SessionId::from("s1"));
        assert_eq!(found.map(|s| s.room_id.as_str()), Some("!elsewhere:x"));
    }
}
