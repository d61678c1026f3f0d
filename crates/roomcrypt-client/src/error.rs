//! Client error types.

use roomcrypt_proto::RoomId;
use thiserror::Error;

/// Errors returned by the state machines' `handle` methods.
///
/// These indicate a driver bug or an unencodable payload, never a
/// per-request failure: those are reported through completion actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A completion arrived for a round that is not in flight.
    #[error("no round {round} in flight for room {room_id}")]
    StaleCompletion {
        /// Room named by the completion
        room_id: RoomId,
        /// Round named by the completion
        round: u64,
    },

    /// A payload could not be encoded.
    #[error("payload encoding failed: {reason}")]
    Encode {
        /// Encoder diagnostic
        reason: String,
    },
}

impl From<roomcrypt_proto::ProtocolError> for ClientError {
    fn from(err: roomcrypt_proto::ProtocolError) -> Self {
        Self::Encode { reason: err.to_string() }
    }
}
