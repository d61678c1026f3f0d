//! Key request payloads.

use serde::{Deserialize, Serialize};

use crate::ids::{Curve25519Key, DeviceId, RoomId, SessionId};

/// Whether a request asks for a key or withdraws an earlier ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRequestAction {
    /// Please send me this key.
    Request,
    /// I no longer need the key requested under this request id.
    RequestCancellation,
}

/// Identifies the session being requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestedKeyInfo {
    /// Group-session algorithm tag.
    pub algorithm: String,
    /// Room the session belongs to.
    pub room_id: RoomId,
    /// Originator of the session.
    pub sender_key: Curve25519Key,
    /// Session identifier.
    pub session_id: SessionId,
}

/// Key request or request cancellation.
///
/// Addressed to `{user_id, device_id}` at the transport layer; `device_id`
/// may be the wildcard to reach every device of the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyRequest {
    /// Request or cancellation.
    pub action: KeyRequestAction,

    /// Device asking for the key.
    pub requesting_device_id: DeviceId,

    /// Correlates a cancellation with its request.
    pub request_id: String,

    /// Requested session. Absent on cancellations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestedKeyInfo>,
}
