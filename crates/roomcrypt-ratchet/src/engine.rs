//! [`RatchetEngine`] over [`ChainRatchet`] state.
//!
//! Clones share one state table, so the encrypting and decrypting workers
//! see each other's sessions (our own outbound sessions are also installed
//! inbound).

#![allow(clippy::disallowed_types, reason = "Synchronous ratchet state only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use hkdf::Hkdf;
use roomcrypt_core::{
    DecryptedBlock, Environment, ExportedSessionKey, InboundGroupSession, InboundSessionKey,
    RatchetEngine, RatchetError,
};
use roomcrypt_proto::{Curve25519Key, Ed25519Key, RoomId, SessionId};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    chain::ChainRatchet,
    cipher::{self, NONCE_RANDOM_SIZE},
};

/// HKDF info label for session ids
const SESSION_ID_LABEL: &[u8] = b"roomcrypt session id";

/// Session id bytes before hex encoding
const SESSION_ID_LEN: usize = 16;

/// An installed inbound session.
struct InboundRatchet {
    /// Ratchet positioned at the first known index; never advanced in place
    initial: ChainRatchet,
    claimed_keys: BTreeMap<String, Ed25519Key>,
}

#[derive(Default)]
struct EngineState {
    outbound: HashMap<SessionId, ChainRatchet>,
    inbound: HashMap<InboundSessionKey, InboundRatchet>,
}

/// Engine keeping every ratchet in memory.
///
/// Ratchet state is not persisted; after a restart the session records
/// reload but the engine starts empty. The outbound side then rotates and
/// the inbound side reports unknown sessions until keys are re-shared.
#[derive(Clone)]
pub struct SymmetricRatchetEngine<E: Environment> {
    env: E,
    state: Arc<Mutex<EngineState>>,
}

impl<E: Environment> SymmetricRatchetEngine<E> {
    /// Empty engine drawing randomness from `env`.
    pub fn new(env: E) -> Self {
        Self { env, state: Arc::new(Mutex::new(EngineState::default())) }
    }

    /// Number of outbound ratchets held.
    pub fn outbound_count(&self) -> usize {
        self.lock().outbound.len()
    }

    /// Number of inbound ratchets held.
    pub fn inbound_count(&self) -> usize {
        self.lock().inbound.len()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("ratchet state mutex poisoned")
    }
}

fn inbound_key(
    room_id: &RoomId,
    sender_key: &Curve25519Key,
    session_id: &SessionId,
) -> InboundSessionKey {
    InboundSessionKey {
        sender_key: sender_key.clone(),
        session_id: session_id.clone(),
        room_id: room_id.clone(),
    }
}

/// Public session id derived from the secret seed and room.
fn derive_session_id(seed: &[u8; 32], room_id: &RoomId) -> SessionId {
    let hkdf = Hkdf::<Sha256>::new(None, seed);

    let mut info = Vec::with_capacity(SESSION_ID_LABEL.len() + room_id.as_str().len());
    info.extend_from_slice(SESSION_ID_LABEL);
    info.extend_from_slice(room_id.as_str().as_bytes());

    let mut id = [0u8; SESSION_ID_LEN];
    let Ok(()) = hkdf.expand(&info, &mut id) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };

    SessionId::from(hex::encode(id))
}

impl<E: Environment> RatchetEngine for SymmetricRatchetEngine<E> {
    fn create_outbound(&self, room_id: &RoomId) -> Result<SessionId, RatchetError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        self.env.random_bytes(&mut seed[..]);

        let session_id = derive_session_id(&seed, room_id);
        let mut state = self.lock();
        if state.outbound.contains_key(&session_id) {
            return Err(RatchetError::Internal(format!("session id collision: {session_id}")));
        }
        state.outbound.insert(session_id.clone(), ChainRatchet::new(&seed));

        Ok(session_id)
    }

    fn export_outbound_key(
        &self,
        session_id: &SessionId,
    ) -> Result<ExportedSessionKey, RatchetError> {
        let state = self.lock();
        let chain = state.outbound.get(session_id).ok_or(RatchetError::UnknownSession)?;
        Ok(ExportedSessionKey { key: chain.export_key(), index: chain.index() })
    }

    fn current_index(&self, session_id: &SessionId) -> Result<u32, RatchetError> {
        let state = self.lock();
        state.outbound.get(session_id).map(ChainRatchet::index).ok_or(RatchetError::UnknownSession)
    }

    fn encrypt(&self, session_id: &SessionId, plaintext: &[u8]) -> Result<Vec<u8>, RatchetError> {
        let mut random = [0u8; NONCE_RANDOM_SIZE];
        self.env.random_bytes(&mut random);

        let mut state = self.lock();
        let chain = state.outbound.get_mut(session_id).ok_or(RatchetError::UnknownSession)?;
        let key = chain.advance()?;

        cipher::seal(&key, session_id, plaintext, &random)
    }

    fn install_inbound(
        &self,
        session: &InboundGroupSession,
        session_key: &str,
    ) -> Result<(), RatchetError> {
        let initial = ChainRatchet::import_key(session_key)?;
        if initial.index() != session.first_known_index {
            return Err(RatchetError::InvalidSessionKey(format!(
                "key starts at index {}, record claims {}",
                initial.index(),
                session.first_known_index
            )));
        }

        let mut state = self.lock();
        if let Some(existing) = state.inbound.get(&session.key())
            && existing.initial.index() <= initial.index()
        {
            return Ok(());
        }
        let claimed_keys = session.claimed_keys.clone();
        state.inbound.insert(session.key(), InboundRatchet { initial, claimed_keys });

        Ok(())
    }

    fn decrypt(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
        ciphertext: &[u8],
    ) -> Result<DecryptedBlock, RatchetError> {
        let index = cipher::message_index(ciphertext)?;

        let state = self.lock();
        let inbound = state
            .inbound
            .get(&inbound_key(room_id, sender_key, session_id))
            .ok_or(RatchetError::UnknownSession)?;

        let mut chain = inbound.initial.clone();
        let key = chain.advance_to(index)?;
        let plaintext = cipher::open(&key, session_id, ciphertext)?;

        Ok(DecryptedBlock {
            plaintext,
            message_index: index,
            claimed_keys: inbound.claimed_keys.clone(),
        })
    }

    fn has_keys(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> bool {
        self.lock().inbound.contains_key(&inbound_key(room_id, sender_key, session_id))
    }

    fn first_known_index(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> Option<u32> {
        self.lock()
            .inbound
            .get(&inbound_key(room_id, sender_key, session_id))
            .map(|inbound| inbound.initial.index())
    }

    fn export_inbound_key(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
        from_index: Option<u32>,
    ) -> Result<ExportedSessionKey, RatchetError> {
        let state = self.lock();
        let inbound = state
            .inbound
            .get(&inbound_key(room_id, sender_key, session_id))
            .ok_or(RatchetError::UnknownSession)?;

        let mut chain = inbound.initial.clone();
        if let Some(index) = from_index {
            chain.skip_to(index)?;
        }

        Ok(ExportedSessionKey { key: chain.export_key(), index: chain.index() })
    }
}
