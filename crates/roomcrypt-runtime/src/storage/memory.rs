#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use roomcrypt_core::{
    InboundGroupSession, InboundSessionKey, OutboundGroupSession, StorageError, Store,
};
use roomcrypt_proto::RoomId;

/// In-memory session store for testing and simulation
///
/// All state is wrapped in Arc<Mutex<>> so clones share it. Uses
/// `lock().expect()`, which panics if the mutex is poisoned.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Current outbound session per room
    outbound: HashMap<RoomId, OutboundGroupSession>,

    /// Inbound records by session key
    inbound: HashMap<InboundSessionKey, InboundGroupSession>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted outbound session of `room_id`.
    #[allow(clippy::expect_used)]
    pub fn outbound(&self, room_id: &RoomId) -> Option<OutboundGroupSession> {
        self.inner.lock().expect("Mutex poisoned").outbound.get(room_id).cloned()
    }

    /// Number of persisted inbound records.
    #[allow(clippy::expect_used)]
    pub fn inbound_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").inbound.len()
    }
}

impl Store for MemoryStore {
    #[allow(clippy::expect_used)]
    fn load_outbound_sessions(&self) -> Result<Vec<OutboundGroupSession>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.outbound.values().cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn save_outbound_session(&self, session: &OutboundGroupSession) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.outbound.insert(session.room_id().clone(), session.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_inbound_sessions(&self) -> Result<Vec<InboundGroupSession>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.inbound.values().cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn save_inbound_session(&self, session: &InboundGroupSession) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.inbound.insert(session.key(), session.clone());
        Ok(())
    }
}
