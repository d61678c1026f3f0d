//! Inbound group session record.

use std::collections::BTreeMap;

use roomcrypt_proto::{Curve25519Key, ED25519, Ed25519Key, RoomId, SessionId};
use serde::{Deserialize, Serialize};

/// Registry key of an inbound session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InboundSessionKey {
    /// Originator's curve key
    pub sender_key: Curve25519Key,
    /// Session identifier
    pub session_id: SessionId,
    /// Room the session encrypts
    pub room_id: RoomId,
}

/// Receiving side's record of a group session.
///
/// Metadata only: the ratchet state is owned by the ratchet engine. The record
/// is immutable once installed; a better key for the same session replaces
/// the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundGroupSession {
    /// Session identifier
    pub session_id: SessionId,
    /// Originator's curve key
    pub sender_key: Curve25519Key,
    /// Room the session encrypts
    pub room_id: RoomId,
    /// Relay curve keys, oldest first. Empty when received from the
    /// originator.
    pub forwarding_chain: Vec<Curve25519Key>,
    /// Signing keys the originator claimed, by algorithm. Display only.
    pub claimed_keys: BTreeMap<String, Ed25519Key>,
    /// True when the key arrived forwarded and may be exported again.
    pub export_format: bool,
    /// Earliest ratchet index this key can decrypt.
    pub first_known_index: u32,
}

impl InboundGroupSession {
    /// Registry key for this record.
    pub fn key(&self) -> InboundSessionKey {
        InboundSessionKey {
            sender_key: self.sender_key.clone(),
            session_id: self.session_id.clone(),
            room_id: self.room_id.clone(),
        }
    }

    /// Claimed Ed25519 signing key, if present.
    pub fn claimed_ed25519(&self) -> Option<&Ed25519Key> {
        self.claimed_keys.get(ED25519)
    }
}
