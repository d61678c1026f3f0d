//! Wire types for group-session key exchange.
//!
//! Identifiers, to-device payloads (`room_key`, `forwarded_room_key`,
//! `room_key_request`, `room_key.withheld`) and the encrypted room-event
//! envelope. Payloads are CBOR-encoded; the to-device event type string
//! selects the payload struct, the same way a frame opcode selects a payload.
//!
//! # Components
//!
//! - [`ids`]: strongly-typed string identifiers
//! - [`ToDeviceContent`]: all key-exchange payloads
//! - [`EncryptedEnvelope`]: ciphertext plus the fields needed to locate the
//!   inbound session
//! - [`RoomPlaintext`]: the cleartext structure sealed inside an envelope

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod errors;
pub mod ids;
pub mod payloads;

pub use envelope::{EncryptedEnvelope, RoomPlaintext};
pub use errors::{ProtocolError, Result};
pub use ids::{
    Curve25519Key, DeviceId, DeviceKey, Ed25519Key, EventId, RoomId, SessionId, TimelineId,
    UserId,
};
pub use payloads::{
    ForwardedRoomKey, KeyRequestAction, RequestedKeyInfo, RoomKey, RoomKeyRequest,
    RoomKeyWithheld, ToDeviceContent, WithheldCode,
};

/// Group-session algorithm tag carried by every payload and envelope.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// Claimed-key algorithm name for signing keys.
pub const ED25519: &str = "ed25519";
