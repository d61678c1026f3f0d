//! Ratchet engine interface.
//!
//! The group-session ratchet (key derivation, per-message encryption, index
//! tracking) is a black box to this layer. Implementations wrap a megolm
//! library in production and a simulated ratchet in tests.

use std::collections::BTreeMap;

use roomcrypt_proto::{Curve25519Key, Ed25519Key, RoomId, SessionId};

use crate::{error::RatchetError, session::InboundGroupSession};

/// Exported session key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSessionKey {
    /// Opaque engine encoding of the ratchet state
    pub key: String,
    /// Ratchet index the exported state starts at
    pub index: u32,
}

/// Result of decrypting one ciphertext block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedBlock {
    /// Cleartext bytes
    pub plaintext: Vec<u8>,
    /// Ratchet index the block was encrypted at
    pub message_index: u32,
    /// Signing keys claimed by the session originator
    pub claimed_keys: BTreeMap<String, Ed25519Key>,
}

/// Double-ratchet group session primitive.
///
/// Must be Clone (shared by the encrypting and decrypting workers), Send +
/// Sync, and synchronous. Implementations share internal state, so clones
/// operate on the same sessions.
///
/// # Invariants
///
/// - Outbound indices only advance: `current_index` after `encrypt` is one
///   greater than before.
/// - `install_inbound` never rewinds an existing inbound ratchet to a later
///   starting index than it already has.
pub trait RatchetEngine: Clone + Send + Sync + 'static {
    /// Create a new outbound session for `room_id`.
    fn create_outbound(&self, room_id: &RoomId) -> Result<SessionId, RatchetError>;

    /// Export the outbound session key at its current index.
    fn export_outbound_key(&self, session_id: &SessionId)
    -> Result<ExportedSessionKey, RatchetError>;

    /// Index the next encryption will use.
    fn current_index(&self, session_id: &SessionId) -> Result<u32, RatchetError>;

    /// Encrypt one block and advance the ratchet.
    fn encrypt(&self, session_id: &SessionId, plaintext: &[u8]) -> Result<Vec<u8>, RatchetError>;

    /// Import an inbound session.
    ///
    /// `session` carries the room, originator, forwarding chain, claimed keys
    /// and export flag.
    fn install_inbound(
        &self,
        session: &InboundGroupSession,
        session_key: &str,
    ) -> Result<(), RatchetError>;

    /// Decrypt one block with an inbound session.
    fn decrypt(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
        ciphertext: &[u8],
    ) -> Result<DecryptedBlock, RatchetError>;

    /// True if an inbound session is installed.
    fn has_keys(&self, room_id: &RoomId, sender_key: &Curve25519Key, session_id: &SessionId)
    -> bool;

    /// Earliest index the installed inbound session can decrypt.
    fn first_known_index(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> Option<u32>;

    /// Export an inbound session, starting at `from_index` (or its first
    /// known index when `None`).
    ///
    /// The export never includes ratchet states earlier than `from_index`.
    fn export_inbound_key(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
        from_index: Option<u32>,
    ) -> Result<ExportedSessionKey, RatchetError>;
}
