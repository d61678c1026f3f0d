//! Decrypting worker.

use std::future::Future;

use roomcrypt_client::{
    DecryptRequest, DecryptedEvent, Decryptor, DecryptorAction, DecryptorEvent, OutboundEvent,
};
use roomcrypt_core::{DecryptFailure, DeviceMessenger, Environment, RatchetEngine, Store};
use roomcrypt_proto::{TimelineId, ToDeviceContent};
use tokio::sync::{mpsc, oneshot};

use crate::{Redecrypted, delivery, encrypting::EncryptCommand, forward};

pub(crate) enum DecryptCommand {
    Decrypt {
        request: DecryptRequest,
        reply: oneshot::Sender<Result<DecryptedEvent, DecryptFailure>>,
    },
    /// Drop a timeline's replay positions
    ResetReplayCheck(TimelineId),
    /// To-device traffic, own sessions and completions
    Event(DecryptorEvent),
}

pub(crate) struct DecryptingWorker<E: Environment, R: RatchetEngine, M, S> {
    pub(crate) decryptor: Decryptor<E, R>,
    pub(crate) messenger: M,
    pub(crate) store: S,
    pub(crate) inbox: mpsc::Receiver<DecryptCommand>,
    pub(crate) loopback: mpsc::WeakSender<DecryptCommand>,
    pub(crate) encryptor: mpsc::WeakSender<EncryptCommand>,
    pub(crate) completions: mpsc::UnboundedSender<Redecrypted>,
}

impl<E, R, M, S> DecryptingWorker<E, R, M, S>
where
    E: Environment,
    R: RatchetEngine,
    M: DeviceMessenger,
    S: Store,
{
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            match command {
                DecryptCommand::Decrypt { request, reply } => {
                    let (result, actions) = self.decryptor.decrypt(request);
                    let _ = reply.send(result);
                    self.execute(actions);
                },
                DecryptCommand::ResetReplayCheck(timeline_id) => {
                    self.decryptor.reset_replay_check(&timeline_id);
                    tracing::debug!("replay check reset for timeline {}", timeline_id);
                },
                DecryptCommand::Event(event) => match self.decryptor.handle(event) {
                    Ok(actions) => self.execute(actions),
                    Err(err) => tracing::warn!("decryptor event failed: {}", err),
                },
            }
        }

        tracing::debug!("decrypting worker stopped");
    }

    fn execute(&mut self, actions: Vec<DecryptorAction>) {
        for action in actions {
            match action {
                DecryptorAction::Redecrypted { timeline_id, event_id, result } => {
                    let event = Redecrypted { timeline_id, event_id, result };
                    if self.completions.send(event).is_err() {
                        tracing::debug!("completion receiver dropped");
                    }
                },

                DecryptorAction::SendKeyRequest { request, request_id, messages } => {
                    let messenger = self.messenger.clone();
                    self.spawn_completion(async move {
                        let result = messenger
                            .send_to_device(ToDeviceContent::ROOM_KEY_REQUEST, messages)
                            .await;
                        DecryptorEvent::KeyRequestSent { request, request_id, result }
                    });
                },

                DecryptorAction::SendToDevice { event_type, messages } => {
                    let messenger = self.messenger.clone();
                    tokio::spawn(async move {
                        if let Err(e) = messenger.send_to_device(event_type, messages).await {
                            tracing::warn!("{} send failed: {}", event_type, e);
                        }
                    });
                },

                DecryptorAction::ShareKey(share) => {
                    let messenger = self.messenger.clone();
                    self.spawn_completion(async move {
                        let request = share.request.clone();
                        let outcome = delivery::share_key(&messenger, share).await;
                        DecryptorEvent::KeyShareFinished { request, outcome }
                    });
                },

                DecryptorAction::ReshareRequested { request } => {
                    let event = OutboundEvent::ReshareRequested { request };
                    if !forward(&self.encryptor, EncryptCommand::Event(event)) {
                        tracing::warn!("encrypting worker gone, reshare request dropped");
                    }
                },

                DecryptorAction::PersistInbound(session) => {
                    if let Err(e) = self.store.save_inbound_session(&session) {
                        tracing::error!(
                            "Failed to persist inbound session {}: {}",
                            session.session_id,
                            e
                        );
                    }
                },

                DecryptorAction::Log { level, message } => crate::log(level, &message),
            }
        }
    }

    /// Run `call` in its own task and post its result back to this worker.
    fn spawn_completion<F>(&self, call: F)
    where
        F: Future<Output = DecryptorEvent> + Send + 'static,
    {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let event = call.await;
            if loopback.send(DecryptCommand::Event(event)).await.is_err() {
                tracing::debug!("decrypting worker gone before completion");
            }
        });
    }
}
