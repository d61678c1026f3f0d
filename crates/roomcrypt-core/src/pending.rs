//! Pending-decryption queue.
//!
//! Buffers events that failed to decrypt for lack of a key, keyed by the
//! session they need. When that session is installed the whole bucket is
//! taken at once and re-decrypted.
//!
//! # Invariants
//!
//! - Within one `(sender_key, session_id)` and timeline, events keep arrival
//!   order and each event id appears at most once.
//! - [`PendingDecryptionQueue::take`] removes the bucket entirely. Entries
//!   with no matching session stay until taken or forgotten.

use std::collections::{BTreeMap, HashMap};

use roomcrypt_proto::{
    Curve25519Key, EncryptedEnvelope, EventId, RoomId, SessionId, TimelineId, UserId,
};

/// Bucket key: the session an event is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey {
    /// Originator of the session
    pub sender_key: Curve25519Key,
    /// Session identifier
    pub session_id: SessionId,
}

/// An event waiting for its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// Event identity, used for de-duplication
    pub event_id: EventId,
    /// Room the event arrived in
    pub room_id: RoomId,
    /// Sending user
    pub sender: UserId,
    /// The undecryptable envelope
    pub envelope: EncryptedEnvelope,
}

/// Events drained from one bucket, grouped by timeline.
pub type DrainedBucket = BTreeMap<TimelineId, Vec<PendingEvent>>;

/// Keyed buffer of undecryptable events.
#[derive(Debug, Default)]
pub struct PendingDecryptionQueue {
    buckets: HashMap<PendingKey, DrainedBucket>,
}

impl PendingDecryptionQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `event` to the bucket for `key` in `timeline_id`.
    ///
    /// Returns `false` if an event with the same id is already queued there.
    pub fn enqueue(
        &mut self,
        key: PendingKey,
        timeline_id: TimelineId,
        event: PendingEvent,
    ) -> bool {
        let events = self.buckets.entry(key).or_default().entry(timeline_id).or_default();

        if events.iter().any(|e| e.event_id == event.event_id) {
            return false;
        }

        events.push(event);
        true
    }

    /// Remove and return every event waiting for `key`.
    pub fn take(&mut self, key: &PendingKey) -> Option<DrainedBucket> {
        self.buckets.remove(key)
    }

    /// Remove one event, for example after it decrypted through another path.
    ///
    /// Returns `true` if the event was queued.
    pub fn forget(
        &mut self,
        key: &PendingKey,
        timeline_id: &TimelineId,
        event_id: &EventId,
    ) -> bool {
        let Some(timelines) = self.buckets.get_mut(key) else {
            return false;
        };
        let Some(events) = timelines.get_mut(timeline_id) else {
            return false;
        };

        let before = events.len();
        events.retain(|e| &e.event_id != event_id);
        let removed = events.len() != before;

        if events.is_empty() {
            timelines.remove(timeline_id);
        }
        if timelines.is_empty() {
            self.buckets.remove(key);
        }

        removed
    }

    /// True if `event_id` is queued under `key`, in any timeline.
    pub fn contains(&self, key: &PendingKey, event_id: &EventId) -> bool {
        self.buckets
            .get(key)
            .is_some_and(|t| t.values().flatten().any(|e| &e.event_id == event_id))
    }

    /// Number of events waiting for `key`.
    pub fn bucket_len(&self, key: &PendingKey) -> usize {
        self.buckets.get(key).map_or(0, |t| t.values().map(Vec::len).sum())
    }

    /// Total queued events.
    pub fn len(&self) -> usize {
        self.buckets.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
