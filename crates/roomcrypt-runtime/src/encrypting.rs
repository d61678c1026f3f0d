//! Encrypting worker.

use std::{collections::HashMap, future::Future};

use roomcrypt_client::{
    ClientError, DecryptorEvent, OutboundAction, OutboundEvent, OutboundSessionManager,
};
use roomcrypt_core::{
    CryptoError, DeviceDirectory, DeviceMessenger, Environment, RatchetEngine, Store,
};
use roomcrypt_proto::{EncryptedEnvelope, RoomId, ToDeviceContent, UserId};
use tokio::sync::{mpsc, oneshot};

use crate::{decrypting::DecryptCommand, delivery, forward};

/// Reply channel of one encryption request.
pub(crate) type EncryptReply = oneshot::Sender<Result<EncryptedEnvelope, CryptoError>>;

pub(crate) enum EncryptCommand {
    Encrypt {
        room_id: RoomId,
        event_type: String,
        content: Vec<u8>,
        target_users: Vec<UserId>,
        reply: EncryptReply,
    },
    /// Completions, discards and reshare requests
    Event(OutboundEvent),
}

pub(crate) struct EncryptingWorker<E: Environment, R: RatchetEngine, D, M, S> {
    pub(crate) manager: OutboundSessionManager<E, R>,
    pub(crate) directory: D,
    pub(crate) messenger: M,
    pub(crate) store: S,
    pub(crate) inbox: mpsc::Receiver<EncryptCommand>,
    pub(crate) loopback: mpsc::WeakSender<EncryptCommand>,
    pub(crate) decryptor: mpsc::WeakSender<DecryptCommand>,
    pub(crate) replies: HashMap<u64, EncryptReply>,
    pub(crate) next_request_id: u64,
}

impl<E, R, D, M, S> EncryptingWorker<E, R, D, M, S>
where
    E: Environment,
    R: RatchetEngine,
    D: DeviceDirectory,
    M: DeviceMessenger,
    S: Store,
{
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            let event = match command {
                EncryptCommand::Encrypt { room_id, event_type, content, target_users, reply } => {
                    self.next_request_id += 1;
                    let request_id = self.next_request_id;
                    self.replies.insert(request_id, reply);
                    OutboundEvent::Encrypt {
                        request_id,
                        room_id,
                        event_type,
                        content,
                        target_users,
                    }
                },
                EncryptCommand::Event(event) => event,
            };

            match self.manager.handle(event) {
                Ok(actions) => self.execute(actions),
                Err(err @ ClientError::StaleCompletion { .. }) => {
                    tracing::debug!("{}", err);
                },
                Err(err) => tracing::warn!("outbound event failed: {}", err),
            }
        }

        tracing::debug!("encrypting worker stopped");
    }

    fn execute(&mut self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::ResolveDevices { room_id, round, user_ids } => {
                    let directory = self.directory.clone();
                    self.spawn_completion(async move {
                        let result = directory.resolve_devices(&user_ids).await;
                        OutboundEvent::DevicesResolved { room_id, round, result }
                    });
                },

                OutboundAction::SendRoomKeys { room_id, round, batch, messages } => {
                    let messenger = self.messenger.clone();
                    self.spawn_completion(async move {
                        let result =
                            messenger.send_to_device(ToDeviceContent::ROOM_KEY, messages).await;
                        OutboundEvent::RoomKeysSent { room_id, round, batch, result }
                    });
                },

                OutboundAction::InstallOwnSession { session, session_key } => {
                    let event = DecryptorEvent::InstallOwnSession { session, session_key };
                    if !forward(&self.decryptor, DecryptCommand::Event(event)) {
                        tracing::warn!("decrypting worker gone, own session not installed");
                    }
                },

                OutboundAction::ShareKey(share) => {
                    let messenger = self.messenger.clone();
                    let decryptor = self.decryptor.clone();
                    tokio::spawn(async move {
                        let request = share.request.clone();
                        let outcome = delivery::share_key(&messenger, share).await;
                        let event = DecryptorEvent::KeyShareFinished { request, outcome };
                        forward(&decryptor, DecryptCommand::Event(event));
                    });
                },

                OutboundAction::Withhold { device, notice, request } => {
                    let messenger = self.messenger.clone();
                    let decryptor = self.decryptor.clone();
                    tokio::spawn(async move {
                        let outcome = delivery::withhold(&messenger, &device, notice).await;
                        let event = DecryptorEvent::KeyShareFinished { request, outcome };
                        forward(&decryptor, DecryptCommand::Event(event));
                    });
                },

                OutboundAction::Completed { request_id, result } => {
                    if let Some(reply) = self.replies.remove(&request_id) {
                        // Caller may have stopped waiting
                        let _ = reply.send(result);
                    }
                },

                OutboundAction::PersistOutbound(session) => {
                    if let Err(e) = self.store.save_outbound_session(&session) {
                        tracing::error!(
                            "Failed to persist outbound session {}: {}",
                            session.session_id(),
                            e
                        );
                    }
                },

                OutboundAction::Log { level, message } => crate::log(level, &message),
            }
        }
    }

    /// Run `call` in its own task and post its result back to this worker.
    fn spawn_completion<F>(&self, call: F)
    where
        F: Future<Output = OutboundEvent> + Send + 'static,
    {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let event = call.await;
            if loopback.send(EncryptCommand::Event(event)).await.is_err() {
                tracing::debug!("encrypting worker gone before completion");
            }
        });
    }
}
