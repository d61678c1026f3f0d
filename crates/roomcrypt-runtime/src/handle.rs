//! Caller-facing API of the workers.

use roomcrypt_client::{DecryptRequest, DecryptedEvent, DecryptorEvent, OutboundEvent};
use roomcrypt_core::{CryptoError, DecryptFailure};
use roomcrypt_proto::{
    Curve25519Key, Ed25519Key, EncryptedEnvelope, EventId, RoomId, TimelineId, UserId,
};
use tokio::sync::{mpsc, oneshot};

use crate::{decrypting::DecryptCommand, encrypting::EncryptCommand};

/// An event decrypted after its key arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redecrypted {
    /// Timeline the event was originally decrypted in
    pub timeline_id: TimelineId,
    /// The event
    pub event_id: EventId,
    /// Retry outcome; failures here are final
    pub result: Result<DecryptedEvent, DecryptFailure>,
}

/// Cloneable handle to the encrypting and decrypting workers.
#[derive(Clone)]
pub struct CryptoHandle {
    encrypt_tx: mpsc::Sender<EncryptCommand>,
    decrypt_tx: mpsc::Sender<DecryptCommand>,
}

impl CryptoHandle {
    pub(crate) fn new(
        encrypt_tx: mpsc::Sender<EncryptCommand>,
        decrypt_tx: mpsc::Sender<DecryptCommand>,
    ) -> Self {
        Self { encrypt_tx, decrypt_tx }
    }

    /// Encrypt a room event for the devices of `target_users`.
    ///
    /// Resolves once the key has reached every target device and the event
    /// is sealed. Dropping the future does not cancel the key distribution
    /// it started.
    pub async fn encrypt(
        &self,
        room_id: RoomId,
        event_type: impl Into<String>,
        content: Vec<u8>,
        target_users: Vec<UserId>,
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let (reply, reply_rx) = oneshot::channel();
        self.encrypt_tx
            .send(EncryptCommand::Encrypt {
                room_id,
                event_type: event_type.into(),
                content,
                target_users,
                reply,
            })
            .await
            .map_err(|_| CryptoError::WorkerStopped)?;

        reply_rx.await.map_err(|_| CryptoError::WorkerStopped)?
    }

    /// Decrypt a room event.
    ///
    /// A failure with `queued` set will be retried and reported on the
    /// completion channel once the key arrives.
    pub async fn decrypt(&self, request: DecryptRequest) -> Result<DecryptedEvent, DecryptFailure> {
        let stopped = || DecryptFailure::terminal(CryptoError::WorkerStopped);

        let (reply, reply_rx) = oneshot::channel();
        self.decrypt_tx
            .send(DecryptCommand::Decrypt { request, reply })
            .await
            .map_err(|_| stopped())?;

        reply_rx.await.map_err(|_| stopped())?
    }

    /// Hand an incoming to-device message to the decrypting worker.
    ///
    /// `sender_key` and `sender_ed25519` are the keys of the secure channel
    /// the message arrived on.
    pub async fn receive_to_device(
        &self,
        sender: UserId,
        sender_key: Curve25519Key,
        sender_ed25519: Option<Ed25519Key>,
        event_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<(), CryptoError> {
        let event = DecryptorEvent::ToDeviceReceived {
            sender,
            sender_key,
            sender_ed25519,
            event_type: event_type.into(),
            content,
        };
        self.decrypt_tx
            .send(DecryptCommand::Event(event))
            .await
            .map_err(|_| CryptoError::WorkerStopped)
    }

    /// Forget the message indices seen in `timeline_id`, for when the
    /// timeline is closed or reloaded.
    pub async fn reset_replay_check(&self, timeline_id: TimelineId) -> Result<(), CryptoError> {
        self.decrypt_tx
            .send(DecryptCommand::ResetReplayCheck(timeline_id))
            .await
            .map_err(|_| CryptoError::WorkerStopped)
    }

    /// Force the room's next encryption onto a fresh session.
    pub async fn discard_session(&self, room_id: RoomId) -> Result<(), CryptoError> {
        self.encrypt_tx
            .send(EncryptCommand::Event(OutboundEvent::DiscardSession { room_id }))
            .await
            .map_err(|_| CryptoError::WorkerStopped)
    }
}
