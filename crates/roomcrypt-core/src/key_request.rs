//! Key share request tracking.
//!
//! One entry per `(requesting device, session)`. Our own outgoing requests
//! are keyed by our own device; requests from other devices by theirs, so the
//! two directions never collide.
//!
//! # Invariants
//!
//! - At most one `Pending` entry per key. A second request for the same key
//!   while one is pending is a duplicate.
//! - Settled entries (`Satisfied`, `Declined`) never block a new request.

use std::collections::HashMap;

use roomcrypt_proto::{Curve25519Key, DeviceId, DeviceKey, RoomId, SessionId, UserId};

/// Identity of a key share request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyShareRequestKey {
    /// User asking for the key
    pub requesting_user: UserId,
    /// Device asking for the key
    pub requesting_device: DeviceId,
    /// Room of the session
    pub room_id: RoomId,
    /// Originator of the session
    pub sender_key: Curve25519Key,
    /// Session identifier
    pub session_id: SessionId,
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShareOutcome {
    /// Awaiting an answer (or a key by other means)
    Pending,
    /// The key was obtained or shared
    Satisfied,
    /// The key will not be shared
    Declined,
}

/// State of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareRequestState {
    /// Wire request id, echoed by cancellations
    pub request_id: String,
    /// Devices the request was (or will be) addressed to
    pub recipients: Vec<DeviceKey>,
    /// Current outcome
    pub outcome: KeyShareOutcome,
    /// True once the transport accepted the request
    pub sent: bool,
}

/// Tracker for outgoing and incoming key share requests.
#[derive(Debug, Default)]
pub struct KeyRequestTracker {
    entries: HashMap<KeyShareRequestKey, KeyShareRequestState>,
}

impl KeyRequestTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request.
    ///
    /// Returns `false` (and changes nothing) if a request for `key` is already
    /// pending.
    pub fn begin(
        &mut self,
        key: KeyShareRequestKey,
        request_id: String,
        recipients: Vec<DeviceKey>,
    ) -> bool {
        if self.is_pending(&key) {
            return false;
        }

        self.entries.insert(
            key,
            KeyShareRequestState {
                request_id,
                recipients,
                outcome: KeyShareOutcome::Pending,
                sent: false,
            },
        );
        true
    }

    /// Record that the transport accepted request `request_id`.
    pub fn mark_sent(&mut self, key: &KeyShareRequestKey, request_id: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(state) if state.request_id == request_id => {
                state.sent = true;
                true
            },
            _ => false,
        }
    }

    /// Drop a pending request whose transmission failed, so a later failure
    /// to decrypt can request again.
    pub fn abandon(
        &mut self,
        key: &KeyShareRequestKey,
        request_id: &str,
    ) -> Option<KeyShareRequestState> {
        match self.entries.get(key) {
            Some(state)
                if state.request_id == request_id && state.outcome == KeyShareOutcome::Pending =>
            {
                self.entries.remove(key)
            },
            _ => None,
        }
    }

    /// Settle a pending request with `outcome`.
    ///
    /// Returns the request as it was while pending, or `None` if nothing was
    /// pending.
    pub fn settle(
        &mut self,
        key: &KeyShareRequestKey,
        outcome: KeyShareOutcome,
    ) -> Option<KeyShareRequestState> {
        let state = self.entries.get_mut(key)?;
        if state.outcome != KeyShareOutcome::Pending {
            return None;
        }

        let pending = state.clone();
        state.outcome = outcome;
        Some(pending)
    }

    /// Remove an entry entirely.
    pub fn remove(&mut self, key: &KeyShareRequestKey) -> Option<KeyShareRequestState> {
        self.entries.remove(key)
    }

    /// Key of the entry a device created under `request_id`.
    pub fn find_by_request_id(
        &self,
        user: &UserId,
        device: &DeviceId,
        request_id: &str,
    ) -> Option<KeyShareRequestKey> {
        self.entries
            .iter()
            .find(|(k, s)| {
                &k.requesting_user == user
                    && &k.requesting_device == device
                    && s.request_id == request_id
            })
            .map(|(k, _)| k.clone())
    }

    /// State of `key`.
    pub fn get(&self, key: &KeyShareRequestKey) -> Option<&KeyShareRequestState> {
        self.entries.get(key)
    }

    /// True if a request for `key` is pending.
    pub fn is_pending(&self, key: &KeyShareRequestKey) -> bool {
        self.entries.get(key).is_some_and(|s| s.outcome == KeyShareOutcome::Pending)
    }

    /// Number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|s| s.outcome == KeyShareOutcome::Pending).count()
    }
}
