//! Protocol-level errors.

use thiserror::Error;

/// Result alias for wire encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// The to-device event type is not one this layer understands
    #[error("unknown to-device event type: {0}")]
    UnknownEventType(String),
}
