//! Key announcement, forwarded key and withheld payloads.

use serde::{Deserialize, Serialize};

use crate::ids::{Curve25519Key, Ed25519Key, RoomId, SessionId};

/// Direct key announcement from the session originator.
///
/// The sender's curve key is not part of the payload: it is taken from the
/// authenticated device-to-device channel the payload arrived on.
///
/// Missing fields decode as empty values so that validation can report which
/// field is absent instead of failing at the CBOR layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomKey {
    /// Group-session algorithm tag.
    pub algorithm: String,

    /// Room the session encrypts.
    pub room_id: RoomId,

    /// Session identifier.
    pub session_id: SessionId,

    /// Exported session key (opaque ratchet-engine encoding).
    pub session_key: String,

    /// Ratchet index the exported key starts at.
    pub chain_index: u32,
}

/// Key forwarded by a relay device.
///
/// # Security
///
/// - `sender_key` names the originator, not the relay. The relay's own curve
///   key comes from the channel and is appended to the chain by the receiver.
/// - `sender_claimed_ed25519_key` is required; a forwarded key without a
///   claimed signing key is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardedRoomKey {
    /// Group-session algorithm tag.
    pub algorithm: String,

    /// Room the session encrypts.
    pub room_id: RoomId,

    /// Session identifier.
    pub session_id: SessionId,

    /// Exported session key (opaque ratchet-engine encoding).
    pub session_key: String,

    /// Ratchet index the exported key starts at.
    pub chain_index: u32,

    /// Curve key of the device that created the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<Curve25519Key>,

    /// Signing key the originator claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_claimed_ed25519_key: Option<Ed25519Key>,

    /// Relays the key already passed through, oldest first.
    pub forwarding_curve25519_key_chain: Vec<Curve25519Key>,
}

/// Reason a device refused to share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithheldCode {
    /// The requester was never meant to receive this session.
    Unauthorised,
    /// The responder does not hold the session.
    Unavailable,
    /// The requester's device is blocked.
    Blacklisted,
}

/// Notice that a key will not be shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyWithheld {
    /// Group-session algorithm tag.
    pub algorithm: String,

    /// Room the session belongs to.
    pub room_id: RoomId,

    /// Session identifier.
    pub session_id: SessionId,

    /// Originator of the session.
    pub sender_key: Curve25519Key,

    /// Machine-readable reason.
    pub code: WithheldCode,

    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
