//! Error types for the group-session layer.
//!
//! [`CryptoError`] is the taxonomy callers see. Every decrypt outcome is a
//! tagged result ([`DecryptFailure`]) rather than an exception path, and every
//! failure carries both a machine-checkable [`CryptoErrorKind`] and a
//! human-diagnosable message.
//!
//! Collaborator errors ([`RatchetError`], [`DirectoryError`],
//! [`TransportError`], [`StorageError`]) are kept separate so that the
//! boundary where they are classified is explicit.

use roomcrypt_proto::{Curve25519Key, DeviceKey, ProtocolError, RoomId, SessionId, TimelineId};
use thiserror::Error;

/// Errors surfaced by the encryption layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Event is missing required fields or cannot be parsed. Never retried.
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// What was wrong with the event
        reason: String,
    },

    /// No inbound session is known for this event. Retryable on key arrival.
    #[error("unknown inbound session {session_id} from {sender_key}")]
    UnknownSession {
        /// Originator of the session
        sender_key: Curve25519Key,
        /// Session the event was encrypted with
        session_id: SessionId,
    },

    /// The session is known but cannot decrypt at this ratchet index.
    /// Retryable on arrival of an earlier-starting key.
    #[error("unknown message index for session {session_id} from {sender_key}: {reason}")]
    UnknownMessageIndex {
        /// Originator of the session
        sender_key: Curve25519Key,
        /// Session the event was encrypted with
        session_id: SessionId,
        /// Engine diagnostic
        reason: String,
    },

    /// Target set contains devices the user has not acknowledged. Nothing was
    /// transmitted; the caller decides whether to proceed.
    #[error("{} unknown device(s) in target set", devices.len())]
    UnknownTargetDevices {
        /// The devices that blocked the send
        devices: Vec<DeviceKey>,
    },

    /// Key distribution or device resolution failed for the current round.
    /// Session state is preserved for a future attempt.
    #[error("transport failure: {reason}")]
    TransportFailure {
        /// Transport diagnostic
        reason: String,
    },

    /// Opaque failure inside the ratchet engine.
    #[error("ratchet engine fault: {reason}")]
    RatchetEngineFault {
        /// Engine diagnostic
        reason: String,
    },

    /// The session belongs to a different room than the event.
    #[error("session {session_id} belongs to room {expected}, event is in room {actual}")]
    RoomMismatch {
        /// Session used by the event
        session_id: SessionId,
        /// Room the session was created for
        expected: RoomId,
        /// Room the event arrived in
        actual: RoomId,
    },

    /// The same ratchet index was already decrypted in this timeline for a
    /// different event (replay).
    #[error("duplicate message index {index} in timeline {timeline_id}")]
    DuplicateMessageIndex {
        /// Replayed ratchet index
        index: u32,
        /// Timeline the replay was detected in
        timeline_id: TimelineId,
    },

    /// Persisting session state failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Storage diagnostic
        reason: String,
    },

    /// The worker owning this state has shut down.
    #[error("crypto worker stopped")]
    WorkerStopped,
}

/// Machine-checkable classification of a [`CryptoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoErrorKind {
    /// See [`CryptoError::MalformedEvent`]
    MalformedEvent,
    /// See [`CryptoError::UnknownSession`]
    UnknownSession,
    /// See [`CryptoError::UnknownMessageIndex`]
    UnknownMessageIndex,
    /// See [`CryptoError::UnknownTargetDevices`]
    UnknownTargetDevices,
    /// See [`CryptoError::TransportFailure`]
    TransportFailure,
    /// See [`CryptoError::RatchetEngineFault`]
    RatchetEngineFault,
    /// See [`CryptoError::RoomMismatch`]
    RoomMismatch,
    /// See [`CryptoError::DuplicateMessageIndex`]
    DuplicateMessageIndex,
    /// See [`CryptoError::Storage`]
    Storage,
    /// See [`CryptoError::WorkerStopped`]
    WorkerStopped,
}

impl CryptoError {
    /// Classification of this error.
    pub fn kind(&self) -> CryptoErrorKind {
        match self {
            Self::MalformedEvent { .. } => CryptoErrorKind::MalformedEvent,
            Self::UnknownSession { .. } => CryptoErrorKind::UnknownSession,
            Self::UnknownMessageIndex { .. } => CryptoErrorKind::UnknownMessageIndex,
            Self::UnknownTargetDevices { .. } => CryptoErrorKind::UnknownTargetDevices,
            Self::TransportFailure { .. } => CryptoErrorKind::TransportFailure,
            Self::RatchetEngineFault { .. } => CryptoErrorKind::RatchetEngineFault,
            Self::RoomMismatch { .. } => CryptoErrorKind::RoomMismatch,
            Self::DuplicateMessageIndex { .. } => CryptoErrorKind::DuplicateMessageIndex,
            Self::Storage { .. } => CryptoErrorKind::Storage,
            Self::WorkerStopped => CryptoErrorKind::WorkerStopped,
        }
    }

    /// Returns true if the event may decrypt once a key arrives.
    ///
    /// Only missing-key conditions are retryable. Malformed events, replays
    /// and engine faults are terminal for the event that caused them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UnknownSession { .. } | Self::UnknownMessageIndex { .. })
    }
}

/// Tagged decrypt failure.
///
/// `queued` is true when the event now sits in the pending-decryption queue
/// and will be retried once its key arrives. It is still a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct DecryptFailure {
    /// Classified failure
    pub error: CryptoError,
    /// Whether the event was queued for retry
    pub queued: bool,
}

impl DecryptFailure {
    /// Terminal failure, not queued.
    pub fn terminal(error: CryptoError) -> Self {
        Self { error, queued: false }
    }

    /// Machine-checkable kind.
    pub fn kind(&self) -> CryptoErrorKind {
        self.error.kind()
    }
}

/// Errors reported by the ratchet engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Engine has no session with this id
    #[error("unknown session")]
    UnknownSession,

    /// Session cannot decrypt at this index
    #[error("unknown message index {index}")]
    UnknownMessageIndex {
        /// Index the ciphertext was encrypted at
        index: u32,
    },

    /// Session key could not be imported
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    /// Ciphertext failed to parse or authenticate
    #[error("bad ciphertext: {0}")]
    BadCiphertext(String),

    /// Any other engine failure
    #[error("{0}")]
    Internal(String),
}

/// Errors from the device directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Device list download failed
    #[error("device query failed: {0}")]
    QueryFailed(String),
}

/// Errors from the device messenger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Send was rejected or timed out. No per-device credit is given.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Device-to-device channel could not be established
    #[error("channel setup failed: {0}")]
    ChannelFailed(String),
}

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error (disk, database)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TransportError> for CryptoError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure { reason: err.to_string() }
    }
}

impl From<DirectoryError> for CryptoError {
    fn from(err: DirectoryError) -> Self {
        Self::TransportFailure { reason: err.to_string() }
    }
}

impl From<StorageError> for CryptoError {
    fn from(err: StorageError) -> Self {
        Self::Storage { reason: err.to_string() }
    }
}

impl From<ProtocolError> for CryptoError {
    fn from(err: ProtocolError) -> Self {
        Self::MalformedEvent { reason: err.to_string() }
    }
}

/// Engine errors outside a decrypt path are opaque faults. Decrypt paths
/// classify `UnknownSession`/`UnknownMessageIndex` themselves, since only they
/// know the session coordinates.
impl From<RatchetError> for CryptoError {
    fn from(err: RatchetError) -> Self {
        Self::RatchetEngineFault { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown_session() -> CryptoError {
        CryptoError::UnknownSession {
            sender_key: Curve25519Key::from("curve"),
            session_id: SessionId::from("s1"),
        }
    }

    #[test]
    fn missing_key_errors_are_retryable() {
        assert!(unknown_session().is_retryable());
        assert!(
            CryptoError::UnknownMessageIndex {
                sender_key: Curve25519Key::from("curve"),
                session_id: SessionId::from("s1"),
                reason: "index 4".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!CryptoError::MalformedEvent { reason: "no session_id".into() }.is_retryable());
        assert!(!CryptoError::UnknownTargetDevices { devices: vec![] }.is_retryable());
        assert!(!CryptoError::TransportFailure { reason: "503".into() }.is_retryable());
        assert!(!CryptoError::RatchetEngineFault { reason: "mac".into() }.is_retryable());
        assert!(
            !CryptoError::DuplicateMessageIndex { index: 3, timeline_id: TimelineId::from("t") }
                .is_retryable()
        );
        assert!(!CryptoError::WorkerStopped.is_retryable());
    }

    #[test]
    fn ratchet_errors_outside_decrypt_are_faults() {
        let err: CryptoError = RatchetError::UnknownSession.into();
        assert_eq!(err.kind(), CryptoErrorKind::RatchetEngineFault);
    }

    #[test]
    fn transport_and_directory_map_to_transport_failure() {
        let err: CryptoError = TransportError::SendFailed("timeout".into()).into();
        assert_eq!(err.kind(), CryptoErrorKind::TransportFailure);

        let err: CryptoError = DirectoryError::QueryFailed("502".into()).into();
        assert_eq!(err.kind(), CryptoErrorKind::TransportFailure);
    }

    #[test]
    fn messages_are_diagnosable() {
        insta::assert_snapshot!(
            unknown_session().to_string(),
            @"unknown inbound session s1 from curve"
        );
        insta::assert_snapshot!(
            CryptoError::UnknownTargetDevices {
                devices: vec![DeviceKey::new("@bob:x", "A"), DeviceKey::new("@bob:x", "B")],
            }
            .to_string(),
            @"2 unknown device(s) in target set"
        );
        insta::assert_snapshot!(
            DecryptFailure { error: unknown_session(), queued: true }.to_string(),
            @"unknown inbound session s1 from curve"
        );
    }
}
