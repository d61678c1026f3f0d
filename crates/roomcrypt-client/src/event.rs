//! Events and actions of the outbound and inbound state machines.

use roomcrypt_core::{
    CryptoError, DecryptFailure, DirectoryError, InboundGroupSession, KeyShareRequestKey,
    OutboundGroupSession, ResolvedDevices, ToDeviceMessages, TransportError,
};
use roomcrypt_proto::{
    Curve25519Key, DeviceKey, EncryptedEnvelope, Ed25519Key, EventId, ForwardedRoomKey, RoomId,
    RoomKeyWithheld, SessionId, TimelineId, UserId,
};

/// Log levels for state machine actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// A forwarded key to deliver to one device once a secure channel exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
    /// Receiving device
    pub device: DeviceKey,
    /// Exported key
    pub content: ForwardedRoomKey,
    /// Incoming request this share answers
    pub request: KeyShareRequestKey,
}

/// How an attempt to answer a key request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    /// Key delivered
    Shared,
    /// No secure channel to the requester; nothing was sent
    NoChannel,
    /// Request refused (withheld notice sent)
    Declined,
    /// Transport failed
    Failed(TransportError),
}

/// Events fed into the [`crate::OutboundSessionManager`].
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Application wants to encrypt an event.
    Encrypt {
        /// Caller-chosen id, echoed in [`OutboundAction::Completed`]
        request_id: u64,
        /// Target room
        room_id: RoomId,
        /// Cleartext event type
        event_type: String,
        /// Cleartext content
        content: Vec<u8>,
        /// Users whose devices must be able to decrypt
        target_users: Vec<UserId>,
    },

    /// Device directory answered a [`OutboundAction::ResolveDevices`].
    DevicesResolved {
        /// Room of the round
        room_id: RoomId,
        /// Round that asked
        round: u64,
        /// Directory answer
        result: Result<ResolvedDevices, DirectoryError>,
    },

    /// Messenger finished a [`OutboundAction::SendRoomKeys`].
    RoomKeysSent {
        /// Room of the round
        room_id: RoomId,
        /// Round that sent
        round: u64,
        /// Batch number within the round
        batch: usize,
        /// Whole-batch outcome
        result: Result<(), TransportError>,
    },

    /// Force a new session on the next encryption in this room.
    DiscardSession {
        /// Room whose session is discarded
        room_id: RoomId,
    },

    /// Another user asked for a key to one of our sessions.
    ReshareRequested {
        /// Tracking key of the incoming request
        request: KeyShareRequestKey,
    },
}

/// Actions the [`crate::OutboundSessionManager`] produces.
#[derive(Debug, Clone)]
pub enum OutboundAction {
    /// Resolve target users to devices, then feed back
    /// [`OutboundEvent::DevicesResolved`].
    ResolveDevices {
        /// Room of the round
        room_id: RoomId,
        /// Round id to echo back
        round: u64,
        /// Users to resolve
        user_ids: Vec<UserId>,
    },

    /// Send one key-announcement batch, then feed back
    /// [`OutboundEvent::RoomKeysSent`].
    SendRoomKeys {
        /// Room of the round
        room_id: RoomId,
        /// Round id to echo back
        round: u64,
        /// Batch number to echo back
        batch: usize,
        /// Encoded `room_key` payload per device
        messages: ToDeviceMessages,
    },

    /// Install a freshly created outbound session as our own inbound
    /// session (routed to the inbound side).
    InstallOwnSession {
        /// Inbound record
        session: InboundGroupSession,
        /// Exported key
        session_key: String,
    },

    /// Deliver a forwarded key once a secure channel exists.
    ShareKey(KeyShare),

    /// Refuse a key request.
    Withhold {
        /// Requesting device
        device: DeviceKey,
        /// Withheld notice
        notice: RoomKeyWithheld,
        /// Incoming request being refused
        request: KeyShareRequestKey,
    },

    /// Encryption request finished.
    Completed {
        /// Id from [`OutboundEvent::Encrypt`]
        request_id: u64,
        /// Envelope or failure
        result: Result<EncryptedEnvelope, CryptoError>,
    },

    /// Persist the room's current outbound session.
    PersistOutbound(OutboundGroupSession),

    /// Log message for debugging.
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Request to decrypt one room event.
#[derive(Debug, Clone)]
pub struct DecryptRequest {
    /// Event identity
    pub event_id: EventId,
    /// Room the event arrived in
    pub room_id: RoomId,
    /// Timeline the event is displayed in
    pub timeline_id: TimelineId,
    /// Sending user
    pub sender: UserId,
    /// Encrypted envelope
    pub envelope: EncryptedEnvelope,
}

/// Successfully decrypted event with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEvent {
    /// Event identity
    pub event_id: EventId,
    /// Room of the event
    pub room_id: RoomId,
    /// Cleartext event type
    pub event_type: String,
    /// Cleartext content
    pub content: Vec<u8>,
    /// Originator's curve key
    pub sender_key: Curve25519Key,
    /// Signing key the originator claimed
    pub claimed_ed25519: Option<Ed25519Key>,
    /// Relays the key passed through
    pub forwarding_chain: Vec<Curve25519Key>,
    /// Session used
    pub session_id: SessionId,
    /// Ratchet index of the event
    pub message_index: u32,
}

/// Events fed into the [`crate::Decryptor`].
#[derive(Debug, Clone)]
pub enum DecryptorEvent {
    /// A to-device message arrived over a secure channel.
    ToDeviceReceived {
        /// Sending user
        sender: UserId,
        /// Sending device's curve key, authenticated by the channel
        sender_key: Curve25519Key,
        /// Signing key the sending device claims
        sender_ed25519: Option<Ed25519Key>,
        /// To-device event type
        event_type: String,
        /// CBOR payload
        content: Vec<u8>,
    },

    /// Our outbound side created a session.
    InstallOwnSession {
        /// Inbound record
        session: InboundGroupSession,
        /// Exported key
        session_key: String,
    },

    /// Messenger finished a [`DecryptorAction::SendKeyRequest`].
    KeyRequestSent {
        /// Tracking key
        request: KeyShareRequestKey,
        /// Wire request id
        request_id: String,
        /// Outcome
        result: Result<(), TransportError>,
    },

    /// An attempt to answer an incoming request finished.
    KeyShareFinished {
        /// Tracking key
        request: KeyShareRequestKey,
        /// Outcome
        outcome: ShareOutcome,
    },
}

/// Actions the [`crate::Decryptor`] produces.
#[derive(Debug, Clone)]
pub enum DecryptorAction {
    /// A queued event was retried after its key arrived.
    Redecrypted {
        /// Timeline the event was queued in
        timeline_id: TimelineId,
        /// Event identity
        event_id: EventId,
        /// Cleartext, or the failure to record on the event
        result: Result<DecryptedEvent, DecryptFailure>,
    },

    /// Send a key request, then feed back
    /// [`DecryptorEvent::KeyRequestSent`].
    SendKeyRequest {
        /// Tracking key
        request: KeyShareRequestKey,
        /// Wire request id
        request_id: String,
        /// Encoded request per recipient
        messages: ToDeviceMessages,
    },

    /// Fire-and-forget to-device send (cancellations, withheld notices).
    SendToDevice {
        /// To-device event type
        event_type: &'static str,
        /// Encoded payload per device
        messages: ToDeviceMessages,
    },

    /// Deliver a forwarded key once a secure channel exists.
    ShareKey(KeyShare),

    /// Another user's key request, for the outbound side to judge.
    ReshareRequested {
        /// Tracking key of the incoming request
        request: KeyShareRequestKey,
    },

    /// Persist an inbound session.
    PersistInbound(InboundGroupSession),

    /// Log message for debugging.
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}
