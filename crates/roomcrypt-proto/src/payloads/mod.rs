//! CBOR-encoded to-device payloads.
//!
//! Key-exchange messages travel device-to-device over an encrypted channel
//! provided by the device messenger. The to-device event type string
//! identifies the payload, so only the inner struct is serialized (no variant
//! tag in CBOR).
//!
//! # Invariants
//!
//! Each variant maps to exactly one event type (enforced by match
//! exhaustiveness). Decoding with the event type returned by
//! [`ToDeviceContent::event_type`] yields an equal value.

mod request;
mod room_key;

pub use request::{KeyRequestAction, RequestedKeyInfo, RoomKeyRequest};
pub use room_key::{ForwardedRoomKey, RoomKey, RoomKeyWithheld, WithheldCode};

use crate::errors::{ProtocolError, Result};

/// All to-device payloads handled by the key-exchange protocol.
///
/// # Security
///
/// - No Variant Tag: the transport-level event type already identifies the
///   payload. A peer cannot send a `room_key` body under the
///   `forwarded_room_key` type and have it parsed as the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToDeviceContent {
    /// Originator announces a group session key
    RoomKey(RoomKey),
    /// A relay forwards a group session key it holds
    ForwardedRoomKey(ForwardedRoomKey),
    /// Ask for (or cancel a request for) a group session key
    RoomKeyRequest(RoomKeyRequest),
    /// A device refuses to share a key
    Withheld(RoomKeyWithheld),
}

impl ToDeviceContent {
    /// Event type of a direct key announcement.
    pub const ROOM_KEY: &'static str = "room_key";
    /// Event type of a forwarded key.
    pub const FORWARDED_ROOM_KEY: &'static str = "forwarded_room_key";
    /// Event type of a key request or request cancellation.
    pub const ROOM_KEY_REQUEST: &'static str = "room_key_request";
    /// Event type of a withheld notice.
    pub const ROOM_KEY_WITHHELD: &'static str = "room_key.withheld";

    /// Event type string for this payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RoomKey(_) => Self::ROOM_KEY,
            Self::ForwardedRoomKey(_) => Self::FORWARDED_ROOM_KEY,
            Self::RoomKeyRequest(_) => Self::ROOM_KEY_REQUEST,
            Self::Withheld(_) => Self::ROOM_KEY_WITHHELD,
        }
    }

    /// Encode the inner payload as CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        match self {
            Self::RoomKey(inner) => ciborium::ser::into_writer(inner, &mut bytes),
            Self::ForwardedRoomKey(inner) => ciborium::ser::into_writer(inner, &mut bytes),
            Self::RoomKeyRequest(inner) => ciborium::ser::into_writer(inner, &mut bytes),
            Self::Withheld(inner) => ciborium::ser::into_writer(inner, &mut bytes),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

        Ok(bytes)
    }

    /// Decode a payload given its event type.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEventType` for event types outside this layer
    /// - `ProtocolError::CborDecode` if the bytes do not match the payload
    pub fn decode(event_type: &str, bytes: &[u8]) -> Result<Self> {
        fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        match event_type {
            Self::ROOM_KEY => from_cbor(bytes).map(Self::RoomKey),
            Self::FORWARDED_ROOM_KEY => from_cbor(bytes).map(Self::ForwardedRoomKey),
            Self::ROOM_KEY_REQUEST => from_cbor(bytes).map(Self::RoomKeyRequest),
            Self::ROOM_KEY_WITHHELD => from_cbor(bytes).map(Self::Withheld),
            other => Err(ProtocolError::UnknownEventType(other.to_string())),
        }
    }
}
