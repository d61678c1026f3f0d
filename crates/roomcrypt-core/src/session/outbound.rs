//! Outbound group session record.
//!
//! The sending side's bookkeeping for one group session: when it was
//! created, how many messages it has encrypted, and which devices have
//! received its key at which ratchet index. The ratchet itself lives in the
//! ratchet engine.
//!
//! # Invariants
//!
//! - `shared_with` only grows. An entry, once recorded, keeps the index it was
//!   first shared at.
//! - `use_count` only grows.
//! - A record that trips a rotation criterion is replaced, never reset.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use roomcrypt_proto::{DeviceId, DeviceKey, RoomId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::config::EncryptionConfig;

/// Why an outbound session has to be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationReason {
    /// The room has no outbound session yet
    NoSession,
    /// Message budget exhausted
    MessageLimit {
        /// Messages encrypted so far
        use_count: u32,
    },
    /// Session is older than the rotation period
    Expired {
        /// Age in milliseconds
        age_ms: u64,
    },
    /// The key reached a device that is no longer a target
    StaleShare {
        /// Device that left the target set
        device: DeviceKey,
    },
    /// Explicitly discarded
    Discarded,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no session"),
            Self::MessageLimit { use_count } => write!(f, "used {use_count} times"),
            Self::Expired { age_ms } => write!(f, "{age_ms}ms old"),
            Self::StaleShare { device } => write!(f, "shared with departed device {device}"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// Outbound group session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundGroupSession {
    session_id: SessionId,
    room_id: RoomId,
    created_at_ms: u64,
    use_count: u32,
    /// user -> device -> ratchet index at time of sharing
    shared_with: BTreeMap<UserId, BTreeMap<DeviceId, u32>>,
}

impl OutboundGroupSession {
    /// Fresh session with no uses and no shares.
    pub fn new(session_id: SessionId, room_id: RoomId, created_at_ms: u64) -> Self {
        Self { session_id, room_id, created_at_ms, use_count: 0, shared_with: BTreeMap::new() }
    }

    /// Engine session id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Room this session encrypts for.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Creation time, wall-clock milliseconds.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Messages encrypted so far.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Ratchet index the key was shared with `device` at, if it was.
    pub fn shared_index(&self, device: &DeviceKey) -> Option<u32> {
        self.shared_with.get(&device.user_id).and_then(|d| d.get(&device.device_id)).copied()
    }

    /// True if the key was shared with `device`.
    pub fn is_shared_with(&self, device: &DeviceKey) -> bool {
        self.shared_index(device).is_some()
    }

    /// Number of devices the key was shared with.
    pub fn shared_count(&self) -> usize {
        self.shared_with.values().map(BTreeMap::len).sum()
    }

    /// All devices the key was shared with, ordered by user then device.
    pub fn shared_devices(&self) -> impl Iterator<Item = (DeviceKey, u32)> + '_ {
        self.shared_with.iter().flat_map(|(user, devices)| {
            devices.iter().map(move |(device, index)| {
                (DeviceKey { user_id: user.clone(), device_id: device.clone() }, *index)
            })
        })
    }

    /// Record that `devices` received the key at `index`.
    ///
    /// Devices already recorded keep their original index.
    pub fn mark_shared<'a>(
        &mut self,
        devices: impl IntoIterator<Item = &'a DeviceKey>,
        index: u32,
    ) {
        for device in devices {
            self.shared_with
                .entry(device.user_id.clone())
                .or_default()
                .entry(device.device_id.clone())
                .or_insert(index);
        }
    }

    /// Count one encryption.
    pub fn record_use(&mut self) {
        self.use_count = self.use_count.saturating_add(1);
    }

    /// Rotation criterion this session trips for the given target set, if
    /// any.
    ///
    /// Usage and age are checked before membership, so the reported reason
    /// is stable when several criteria hold at once.
    pub fn rotation_reason(
        &self,
        config: &EncryptionConfig,
        now_ms: u64,
        targets: &BTreeSet<DeviceKey>,
    ) -> Option<RotationReason> {
        if let Some(reason) = self.expiry_reason(config, now_ms) {
            return Some(reason);
        }

        self.shared_devices()
            .map(|(device, _)| device)
            .find(|device| !targets.contains(device))
            .map(|device| RotationReason::StaleShare { device })
    }

    /// Usage or age criterion, independent of membership.
    pub fn expiry_reason(&self, config: &EncryptionConfig, now_ms: u64) -> Option<RotationReason> {
        if self.use_count >= config.rotation_period_messages {
            return Some(RotationReason::MessageLimit { use_count: self.use_count });
        }

        let age_ms = now_ms.saturating_sub(self.created_at_ms);
        if age_ms >= config.rotation_period_ms {
            return Some(RotationReason::Expired { age_ms });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(user: &str, device: &str) -> DeviceKey {
        DeviceKey::new(user, device)
    }

    fn session() -> OutboundGroupSession {
        OutboundGroupSession::new(SessionId::from("s1"), RoomId::from("!r:x"), 1_000)
    }

    #[test]
    fn mark_shared_keeps_first_index() {
        let mut s = session();
        let alice = device("@alice:x", "A");

        s.mark_shared([&alice], 3);
        s.mark_shared([&alice], 9);

        assert_eq!(s.shared_index(&alice), Some(3));
        assert_eq!(s.shared_count(), 1);
    }

    #[test]
    fn message_limit_trips_at_threshold() {
        let config = EncryptionConfig { rotation_period_messages: 2, ..Default::default() };
        let mut s = session();
        let targets = BTreeSet::new();

        s.record_use();
        assert_eq!(s.rotation_reason(&config, 1_000, &targets), None);

        s.record_use();
        assert_eq!(
            s.rotation_reason(&config, 1_000, &targets),
            Some(RotationReason::MessageLimit { use_count: 2 })
        );
    }

    #[test]
    fn age_trips_at_period() {
        let config = EncryptionConfig { rotation_period_ms: 500, ..Default::default() };
        let s = session();

        assert_eq!(s.rotation_reason(&config, 1_499, &BTreeSet::new()), None);
        assert_eq!(
            s.rotation_reason(&config, 1_500, &BTreeSet::new()),
            Some(RotationReason::Expired { age_ms: 500 })
        );
    }

    #[test]
    fn departed_device_is_stale_share() {
        let config = EncryptionConfig::default();
        let mut s = session();
        let alice = device("@alice:x", "A");
        let bob = device("@bob:x", "B");
        s.mark_shared([&alice, &bob], 0);

        let targets: BTreeSet<_> = [alice.clone(), bob.clone()].into_iter().collect();
        assert_eq!(s.rotation_reason(&config, 1_000, &targets), None);

        let targets: BTreeSet<_> = [alice].into_iter().collect();
        assert_eq!(
            s.rotation_reason(&config, 1_000, &targets),
            Some(RotationReason::StaleShare { device: bob })
        );
    }

    #[test]
    fn new_target_is_not_stale() {
        let mut s = session();
        let alice = device("@alice:x", "A");
        s.mark_shared([&alice], 0);

        let targets: BTreeSet<_> = [alice, device("@carol:x", "C")].into_iter().collect();
        assert_eq!(s.rotation_reason(&EncryptionConfig::default(), 1_000, &targets), None);
    }
}
