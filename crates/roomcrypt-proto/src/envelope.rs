//! Encrypted room-event envelope and its sealed cleartext.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    ids::{Curve25519Key, DeviceId, RoomId, SessionId},
};

/// Encrypted room event as it appears in the room timeline.
///
/// Fields are optional on the wire because the envelope comes from the
/// network: a missing field must surface as a malformed event, not as a
/// decode error somewhere upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptedEnvelope {
    /// Group-session algorithm tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Curve key of the sending device (originator of the session).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<Curve25519Key>,

    /// Ratchet-engine ciphertext.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<Vec<u8>>,

    /// Session the ciphertext was produced with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Device id of the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

impl EncryptedEnvelope {
    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

/// Cleartext sealed inside an envelope.
///
/// The room id is bound into the ciphertext so a server cannot replay an
/// event into a different room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPlaintext {
    /// Room the event was encrypted for.
    pub room_id: RoomId,

    /// Cleartext event type.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Cleartext event content (application encoding).
    pub content: Vec<u8>,
}

impl RoomPlaintext {
    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}
