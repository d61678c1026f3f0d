//! Inbound decryption.
//!
//! The [`Decryptor`] owns everything the receiving side mutates: the inbound
//! half of the session registry, the pending-decryption queue, the key
//! request tracker and the per-timeline replay map. Key exchange handlers live
//! in `key_exchange` and operate on the same state.
//!
//! A decrypt attempt validates the envelope, looks the session up, asks the
//! ratchet engine to decrypt, and classifies the outcome. Missing-key failures
//! queue the event under the session it needs and (optionally) ask other
//! devices for the key. Everything else is terminal.
//!
//! # Invariants
//!
//! - A queued event is still a failure. [`DecryptFailure::queued`] says so.
//! - When a session is installed its pending bucket is drained completely in
//!   the same step. Retried events are reported once and never re-queued.
//! - Within one timeline a `(sender_key, session_id, index)` maps to exactly
//!   one event id, until the timeline's replay check is reset.

use std::collections::HashMap;

use roomcrypt_core::{
    CryptoError, DecryptFailure, DecryptionConfig, Environment, InboundSessionKey, InboundSessions,
    KeyRequestTracker, KeyShareOutcome, KeyShareRequestKey, PendingDecryptionQueue, PendingEvent,
    PendingKey, RatchetEngine, RatchetError, ToDeviceMessages, TransportError,
};
use roomcrypt_proto::{
    Curve25519Key, DeviceId, DeviceKey, EncryptedEnvelope, EventId, KeyRequestAction,
    MEGOLM_ALGORITHM, RequestedKeyInfo, RoomId, RoomKeyRequest, RoomPlaintext, SessionId,
    TimelineId, ToDeviceContent, UserId,
};

use crate::{
    error::ClientError,
    event::{DecryptRequest, DecryptedEvent, DecryptorAction, DecryptorEvent, LogLevel},
    identity::DeviceIdentity,
};

/// Ratchet position of one decrypted message.
type ReplayKey = (Curve25519Key, SessionId, u32);

/// Sans-IO inbound decryptor and key exchange endpoint.
pub struct Decryptor<E: Environment, R: RatchetEngine> {
    pub(crate) env: E,
    pub(crate) engine: R,
    pub(crate) identity: DeviceIdentity,
    pub(crate) config: DecryptionConfig,
    pub(crate) sessions: InboundSessions,
    pub(crate) pending: PendingDecryptionQueue,
    pub(crate) requests: KeyRequestTracker,
    replays: HashMap<TimelineId, HashMap<ReplayKey, EventId>>,
}

impl<E: Environment, R: RatchetEngine> Decryptor<E, R> {
    /// Create a decryptor over previously persisted sessions.
    pub fn new(
        env: E,
        engine: R,
        identity: DeviceIdentity,
        config: DecryptionConfig,
        sessions: InboundSessions,
    ) -> Self {
        Self {
            env,
            engine,
            identity,
            config,
            sessions,
            pending: PendingDecryptionQueue::new(),
            requests: KeyRequestTracker::new(),
            replays: HashMap::new(),
        }
    }

    /// Installed inbound sessions.
    pub fn sessions(&self) -> &InboundSessions {
        &self.sessions
    }

    /// Events waiting for keys.
    pub fn pending(&self) -> &PendingDecryptionQueue {
        &self.pending
    }

    /// Outgoing and incoming key requests.
    pub fn requests(&self) -> &KeyRequestTracker {
        &self.requests
    }

    /// Forget every ratchet position seen in `timeline_id`.
    ///
    /// Call when the timeline is closed or rebuilt; events decrypted in it
    /// afterwards are checked against a fresh map.
    pub fn reset_replay_check(&mut self, timeline_id: &TimelineId) {
        self.replays.remove(timeline_id);
    }

    /// Timelines with recorded ratchet positions.
    pub fn replay_timelines(&self) -> usize {
        self.replays.len()
    }

    /// Decrypt one room event.
    ///
    /// Returns the outcome for the caller plus actions to execute (key
    /// requests, logs).
    pub fn decrypt(
        &mut self,
        request: DecryptRequest,
    ) -> (Result<DecryptedEvent, DecryptFailure>, Vec<DecryptorAction>) {
        let DecryptRequest { event_id, room_id, timeline_id, sender, envelope } = request;

        let error = match self.attempt(&room_id, &timeline_id, &event_id, &envelope) {
            Ok(event) => {
                // A copy queued earlier must not be delivered again by a drain
                let key = PendingKey {
                    sender_key: event.sender_key.clone(),
                    session_id: event.session_id.clone(),
                };
                self.pending.forget(&key, &timeline_id, &event_id);
                return (Ok(event), Vec::new());
            },
            Err(error) => error,
        };

        let Some(key) = missing_key(&error) else {
            let actions = vec![DecryptorAction::Log {
                level: LogLevel::Debug,
                message: format!("event {event_id} in {room_id} failed: {error}"),
            }];
            return (Err(DecryptFailure::terminal(error)), actions);
        };

        let device_id = envelope.device_id.clone();
        self.pending.enqueue(key.clone(), timeline_id, PendingEvent {
            event_id,
            room_id: room_id.clone(),
            sender: sender.clone(),
            envelope,
        });

        let mut actions = Vec::new();
        if self.config.request_keys {
            match self.request_key(&room_id, &key, &sender, device_id.as_ref()) {
                Ok(requested) => actions.extend(requested),
                Err(err) => actions.push(DecryptorAction::Log {
                    level: LogLevel::Warn,
                    message: format!("cannot request key for {}: {err}", key.session_id),
                }),
            }
        }

        (Err(DecryptFailure { error, queued: true }), actions)
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: DecryptorEvent) -> Result<Vec<DecryptorAction>, ClientError> {
        match event {
            DecryptorEvent::ToDeviceReceived {
                sender,
                sender_key,
                sender_ed25519,
                event_type,
                content,
            } => self.handle_to_device(&sender, sender_key, sender_ed25519, &event_type, &content),
            DecryptorEvent::InstallOwnSession { session, session_key } => {
                self.install(session, &session_key)
            },
            DecryptorEvent::KeyRequestSent { request, request_id, result } => {
                Ok(self.handle_request_sent(&request, &request_id, result.err()))
            },
            DecryptorEvent::KeyShareFinished { request, outcome } => {
                Ok(self.handle_share_finished(&request, outcome))
            },
        }
    }

    /// One decrypt attempt with no side effects on the queue or requests.
    fn attempt(
        &mut self,
        room_id: &RoomId,
        timeline_id: &TimelineId,
        event_id: &EventId,
        envelope: &EncryptedEnvelope,
    ) -> Result<DecryptedEvent, CryptoError> {
        let (sender_key, session_id, ciphertext) = validate(envelope)?;

        let key = InboundSessionKey {
            sender_key: sender_key.clone(),
            session_id: session_id.clone(),
            room_id: room_id.clone(),
        };
        let Some(record) = self.sessions.get(&key) else {
            if let Some(other) = self.sessions.find_any_room(sender_key, session_id) {
                return Err(CryptoError::RoomMismatch {
                    session_id: session_id.clone(),
                    expected: other.room_id.clone(),
                    actual: room_id.clone(),
                });
            }
            return Err(CryptoError::UnknownSession {
                sender_key: sender_key.clone(),
                session_id: session_id.clone(),
            });
        };

        let block = self
            .engine
            .decrypt(room_id, sender_key, session_id, ciphertext)
            .map_err(|err| classify(err, sender_key, session_id))?;

        let plaintext = RoomPlaintext::decode(&block.plaintext)?;
        if &plaintext.room_id != room_id {
            return Err(CryptoError::RoomMismatch {
                session_id: session_id.clone(),
                expected: plaintext.room_id,
                actual: room_id.clone(),
            });
        }

        if self.config.detect_replays {
            let seen = self.replays.entry(timeline_id.clone()).or_default();
            let position = (sender_key.clone(), session_id.clone(), block.message_index);
            match seen.get(&position) {
                Some(previous) if previous != event_id => {
                    return Err(CryptoError::DuplicateMessageIndex {
                        index: block.message_index,
                        timeline_id: timeline_id.clone(),
                    });
                },
                Some(_) => {},
                None => {
                    seen.insert(position, event_id.clone());
                },
            }
        }

        Ok(DecryptedEvent {
            event_id: event_id.clone(),
            room_id: room_id.clone(),
            event_type: plaintext.event_type,
            content: plaintext.content,
            sender_key: sender_key.clone(),
            claimed_ed25519: record.claimed_ed25519().cloned(),
            forwarding_chain: record.forwarding_chain.clone(),
            session_id: session_id.clone(),
            message_index: block.message_index,
        })
    }

    /// Re-decrypt every event waiting for `(sender_key, session_id)`.
    ///
    /// Key requests and queueing are off: each event is reported exactly once.
    pub(crate) fn retry_pending(
        &mut self,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> Vec<DecryptorAction> {
        let key = PendingKey { sender_key: sender_key.clone(), session_id: session_id.clone() };
        let Some(bucket) = self.pending.take(&key) else {
            return Vec::new();
        };

        let count: usize = bucket.values().map(Vec::len).sum();
        let mut actions = vec![DecryptorAction::Log {
            level: LogLevel::Debug,
            message: format!("retrying {count} event(s) waiting for {session_id}"),
        }];

        for (timeline_id, events) in bucket {
            for event in events {
                let result = self
                    .attempt(&event.room_id, &timeline_id, &event.event_id, &event.envelope)
                    .map_err(DecryptFailure::terminal);
                actions.push(DecryptorAction::Redecrypted {
                    timeline_id: timeline_id.clone(),
                    event_id: event.event_id,
                    result,
                });
            }
        }

        actions
    }

    /// Ask our other devices and the sending device for a missing key.
    fn request_key(
        &mut self,
        room_id: &RoomId,
        key: &PendingKey,
        sender: &UserId,
        sender_device: Option<&DeviceId>,
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        let request = self.own_request(room_id, &key.sender_key, &key.session_id);

        let mut recipients = vec![DeviceKey {
            user_id: self.identity.user_id.clone(),
            device_id: DeviceId::wildcard(),
        }];
        if let Some(device) = sender_device.filter(|_| sender != &self.identity.user_id) {
            recipients.push(DeviceKey { user_id: sender.clone(), device_id: device.clone() });
        }

        let request_id = format!("{:016x}", self.env.random_u64());
        if !self.requests.begin(request.clone(), request_id.clone(), recipients.clone()) {
            return Ok(vec![DecryptorAction::Log {
                level: LogLevel::Debug,
                message: format!("key for {} already requested", key.session_id),
            }]);
        }

        let payload = ToDeviceContent::RoomKeyRequest(RoomKeyRequest {
            action: KeyRequestAction::Request,
            requesting_device_id: self.identity.device_id.clone(),
            request_id: request_id.clone(),
            body: Some(RequestedKeyInfo {
                algorithm: MEGOLM_ALGORITHM.to_string(),
                room_id: room_id.clone(),
                sender_key: key.sender_key.clone(),
                session_id: key.session_id.clone(),
            }),
        })
        .encode();
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => {
                self.requests.abandon(&request, &request_id);
                return Err(err.into());
            },
        };

        Ok(vec![
            DecryptorAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "requesting key for {} from {} recipient(s)",
                    key.session_id,
                    recipients.len()
                ),
            },
            DecryptorAction::SendKeyRequest {
                request,
                request_id,
                messages: fan_out(&recipients, &payload),
            },
        ])
    }

    /// Settle our own request for a session that is now installed, telling
    /// its recipients to stop.
    pub(crate) fn cancel_own_request(
        &mut self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        let request = self.own_request(room_id, sender_key, session_id);
        let Some(state) = self.requests.settle(&request, KeyShareOutcome::Satisfied) else {
            return Ok(Vec::new());
        };

        let payload = ToDeviceContent::RoomKeyRequest(RoomKeyRequest {
            action: KeyRequestAction::RequestCancellation,
            requesting_device_id: self.identity.device_id.clone(),
            request_id: state.request_id,
            body: None,
        })
        .encode()?;

        Ok(vec![DecryptorAction::SendToDevice {
            event_type: ToDeviceContent::ROOM_KEY_REQUEST,
            messages: fan_out(&state.recipients, &payload),
        }])
    }

    /// Tracking key of our own request for a session.
    pub(crate) fn own_request(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519Key,
        session_id: &SessionId,
    ) -> KeyShareRequestKey {
        KeyShareRequestKey {
            requesting_user: self.identity.user_id.clone(),
            requesting_device: self.identity.device_id.clone(),
            room_id: room_id.clone(),
            sender_key: sender_key.clone(),
            session_id: session_id.clone(),
        }
    }

    fn handle_request_sent(
        &mut self,
        request: &KeyShareRequestKey,
        request_id: &str,
        error: Option<TransportError>,
    ) -> Vec<DecryptorAction> {
        match error {
            None => {
                self.requests.mark_sent(request, request_id);
                Vec::new()
            },
            Some(err) => {
                // Forget it so the next failure to decrypt asks again
                self.requests.abandon(request, request_id);
                vec![DecryptorAction::Log {
                    level: LogLevel::Warn,
                    message: format!("key request for {} not sent: {err}", request.session_id),
                }]
            },
        }
    }
}

/// Required envelope fields, or `MalformedEvent`.
fn validate(
    envelope: &EncryptedEnvelope,
) -> Result<(&Curve25519Key, &SessionId, &[u8]), CryptoError> {
    let malformed = |reason: &str| CryptoError::MalformedEvent { reason: reason.to_string() };

    match envelope.algorithm.as_deref() {
        Some(MEGOLM_ALGORITHM) => {},
        Some(other) => {
            return Err(CryptoError::MalformedEvent {
                reason: format!("unsupported algorithm {other}"),
            });
        },
        None => return Err(malformed("missing algorithm")),
    }

    let sender_key = envelope
        .sender_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| malformed("missing sender_key"))?;
    let session_id = envelope
        .session_id
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed("missing session_id"))?;
    let ciphertext = envelope
        .ciphertext
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| malformed("missing ciphertext"))?;

    Ok((sender_key, session_id, ciphertext))
}

/// Map an engine decrypt error onto the caller-visible taxonomy.
fn classify(err: RatchetError, sender_key: &Curve25519Key, session_id: &SessionId) -> CryptoError {
    match err {
        RatchetError::UnknownSession => CryptoError::UnknownSession {
            sender_key: sender_key.clone(),
            session_id: session_id.clone(),
        },
        RatchetError::UnknownMessageIndex { index } => CryptoError::UnknownMessageIndex {
            sender_key: sender_key.clone(),
            session_id: session_id.clone(),
            reason: format!("no key for index {index}"),
        },
        other => other.into(),
    }
}

/// Bucket a retryable failure waits in.
fn missing_key(error: &CryptoError) -> Option<PendingKey> {
    match error {
        CryptoError::UnknownSession { sender_key, session_id }
        | CryptoError::UnknownMessageIndex { sender_key, session_id, .. } => {
            Some(PendingKey { sender_key: sender_key.clone(), session_id: session_id.clone() })
        },
        _ => None,
    }
}

pub(crate) fn fan_out(recipients: &[DeviceKey], payload: &[u8]) -> ToDeviceMessages {
    let mut messages = ToDeviceMessages::new();
    for device in recipients {
        messages.insert(device, payload.to_vec());
    }
    messages
}
