//! Fixtures shared by the state machine unit tests.

use roomcrypt_core::{DecryptionConfig, InboundSessions, RatchetEngine};
use roomcrypt_harness::SimEnv;
use roomcrypt_proto::{
    Curve25519Key, Ed25519Key, EncryptedEnvelope, EventId, ForwardedRoomKey, MEGOLM_ALGORITHM,
    RoomId, RoomKey, RoomPlaintext, SessionId, TimelineId, ToDeviceContent, UserId,
};
use roomcrypt_ratchet::SymmetricRatchetEngine;

use crate::{
    decryptor::Decryptor,
    event::{DecryptRequest, DecryptorAction, DecryptorEvent},
    identity::DeviceIdentity,
};

pub(crate) type Engine = SymmetricRatchetEngine<SimEnv>;
pub(crate) type TestDecryptor = Decryptor<SimEnv, Engine>;

pub(crate) const ALICE: &str = "@alice:x";
pub(crate) const BOB: &str = "@bob:x";

pub(crate) fn room() -> RoomId {
    RoomId::from("!room:x")
}

pub(crate) fn bob() -> DeviceIdentity {
    DeviceIdentity::new(BOB, "B1", "bob-curve", "bob-ed")
}

pub(crate) fn decryptor(identity: DeviceIdentity, config: DecryptionConfig) -> TestDecryptor {
    let env = SimEnv::with_seed(2);
    let engine = SymmetricRatchetEngine::new(env.clone());
    Decryptor::new(env, engine, identity, config, InboundSessions::new())
}

/// Alice's sending side: one outbound session in [`room`].
pub(crate) struct Sender {
    engine: Engine,
    pub(crate) session_id: SessionId,
}

impl Sender {
    pub(crate) fn new() -> Self {
        let engine = SymmetricRatchetEngine::new(SimEnv::with_seed(1));
        let session_id = engine.create_outbound(&room()).unwrap();
        Self { engine, session_id }
    }

    pub(crate) fn curve() -> Curve25519Key {
        Curve25519Key::from("alice-curve")
    }

    /// Key announcement at the current ratchet index.
    pub(crate) fn room_key(&self) -> ToDeviceContent {
        let exported = self.engine.export_outbound_key(&self.session_id).unwrap();
        ToDeviceContent::RoomKey(RoomKey {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            room_id: room(),
            session_id: self.session_id.clone(),
            session_key: exported.key,
            chain_index: exported.index,
        })
    }

    /// Forwarded copy of the key at the current index, relayed through
    /// `chain`.
    pub(crate) fn forwarded_key(&self, chain: &[&str]) -> ToDeviceContent {
        let exported = self.engine.export_outbound_key(&self.session_id).unwrap();
        ToDeviceContent::ForwardedRoomKey(ForwardedRoomKey {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            room_id: room(),
            session_id: self.session_id.clone(),
            session_key: exported.key,
            chain_index: exported.index,
            sender_key: Some(Self::curve()),
            sender_claimed_ed25519_key: Some("alice-ed".into()),
            forwarding_curve25519_key_chain: chain
                .iter()
                .copied()
                .map(Curve25519Key::from)
                .collect(),
        })
    }

    /// Encrypt `body` for [`room`].
    pub(crate) fn seal(&self, body: &str) -> EncryptedEnvelope {
        let plaintext = RoomPlaintext {
            room_id: room(),
            event_type: "m.room.message".to_string(),
            content: body.as_bytes().to_vec(),
        }
        .encode()
        .unwrap();

        EncryptedEnvelope {
            algorithm: Some(MEGOLM_ALGORITHM.to_string()),
            sender_key: Some(Self::curve()),
            ciphertext: Some(self.engine.encrypt(&self.session_id, &plaintext).unwrap()),
            session_id: Some(self.session_id.clone()),
            device_id: Some("A1".into()),
        }
    }
}

pub(crate) fn request(event_id: &str, envelope: EncryptedEnvelope) -> DecryptRequest {
    DecryptRequest {
        event_id: EventId::from(event_id),
        room_id: room(),
        timeline_id: TimelineId::from("main"),
        sender: UserId::from(ALICE),
        envelope,
    }
}

/// Deliver `content` as if `sender`'s device with curve key `sender_key`
/// sent it over a secure channel.
pub(crate) fn deliver(
    d: &mut TestDecryptor,
    sender: &str,
    sender_key: &str,
    content: &ToDeviceContent,
) -> Vec<DecryptorAction> {
    d.handle(DecryptorEvent::ToDeviceReceived {
        sender: UserId::from(sender),
        sender_key: Curve25519Key::from(sender_key),
        sender_ed25519: Some(Ed25519Key::from(sender_key.replace("curve", "ed"))),
        event_type: content.event_type().to_string(),
        content: content.encode().unwrap(),
    })
    .unwrap()
}

/// Deliver Alice's key announcement.
pub(crate) fn deliver_room_key(d: &mut TestDecryptor, sender: &Sender) -> Vec<DecryptorAction> {
    deliver(d, ALICE, "alice-curve", &sender.room_key())
}

pub(crate) fn redecrypted(actions: &[DecryptorAction]) -> Vec<&DecryptorAction> {
    actions.iter().filter(|a| matches!(a, DecryptorAction::Redecrypted { .. })).collect()
}
