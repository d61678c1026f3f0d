//! Outbound session manager.
//!
//! Owns the current outbound session of every room and drives each
//! encryption through a *round*: resolve the target users to devices, decide
//! whether the session must rotate, share the key with devices that lack it
//! (one batch in flight at a time), then encrypt every queued request the
//! round covers.
//!
//! # Invariants
//!
//! - At most one round per room. Requests arriving mid-round wait in the
//!   room's FIFO. A round covers the leading run of requests with its target
//!   set; the first request with another target set starts the next round, so
//!   requests complete in submission order.
//! - A failed round fails exactly the requests it covered and keeps the
//!   session. A retry only re-sends to devices still missing the key.
//! - Nothing is encrypted before every resolved device has the key.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use roomcrypt_core::{
    CryptoError, DeviceInfo, EncryptionConfig, Environment, InboundGroupSession,
    KeyShareRequestKey, OutboundGroupSession, OutboundSessions, RatchetEngine, ResolvedDevices,
    RotationReason, ToDeviceMessages,
};
use roomcrypt_proto::{
    DeviceKey, ED25519, EncryptedEnvelope, ForwardedRoomKey, MEGOLM_ALGORITHM, RoomId, RoomKey,
    RoomKeyWithheld, RoomPlaintext, ToDeviceContent, UserId, WithheldCode,
};

use crate::{
    batch::split_batches,
    error::ClientError,
    event::{KeyShare, LogLevel, OutboundAction, OutboundEvent},
    identity::DeviceIdentity,
};

/// A request waiting for its round.
#[derive(Debug)]
struct QueuedEncryption {
    request_id: u64,
    event_type: String,
    content: Vec<u8>,
    targets: BTreeSet<UserId>,
}

#[derive(Debug)]
enum RoundStage {
    Resolving,
    Sharing {
        /// Encoded `room_key` payload, identical for every device
        payload: Vec<u8>,
        chain_index: u32,
        in_flight: Vec<DeviceKey>,
        batch: usize,
        remaining: VecDeque<Vec<DeviceKey>>,
    },
}

#[derive(Debug)]
struct Round {
    id: u64,
    targets: BTreeSet<UserId>,
    stage: RoundStage,
}

#[derive(Debug, Default)]
struct RoomQueue {
    waiting: VecDeque<QueuedEncryption>,
    round: Option<Round>,
    discard_requested: bool,
}

/// Sans-IO manager of outbound group sessions.
pub struct OutboundSessionManager<E: Environment, R: RatchetEngine> {
    env: E,
    engine: R,
    identity: DeviceIdentity,
    config: EncryptionConfig,
    sessions: OutboundSessions,
    rooms: HashMap<RoomId, RoomQueue>,
    next_round: u64,
}

impl<E: Environment, R: RatchetEngine> OutboundSessionManager<E, R> {
    /// Create a manager over previously persisted sessions.
    pub fn new(
        env: E,
        engine: R,
        identity: DeviceIdentity,
        config: EncryptionConfig,
        sessions: OutboundSessions,
    ) -> Self {
        Self { env, engine, identity, config, sessions, rooms: HashMap::new(), next_round: 0 }
    }

    /// Current outbound session of a room.
    pub fn session(&self, room_id: &RoomId) -> Option<&OutboundGroupSession> {
        self.sessions.get(room_id)
    }

    /// Requests waiting in a room's FIFO, including those of the current
    /// round.
    pub fn queued(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.waiting.len())
    }

    /// True if a round is underway in the room.
    pub fn round_in_flight(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|r| r.round.is_some())
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: OutboundEvent) -> Result<Vec<OutboundAction>, ClientError> {
        match event {
            OutboundEvent::Encrypt { request_id, room_id, event_type, content, target_users } => {
                Ok(self.handle_encrypt(request_id, room_id, event_type, content, target_users))
            },
            OutboundEvent::DevicesResolved { room_id, round, result } => match result {
                Ok(resolved) => self.handle_devices_resolved(&room_id, round, &resolved),
                Err(err) => {
                    self.expect_stage(&room_id, round, None)?;
                    Ok(self.fail_round(&room_id, err.into()))
                },
            },
            OutboundEvent::RoomKeysSent { room_id, round, batch, result } => {
                self.expect_stage(&room_id, round, Some(batch))?;
                match result {
                    Ok(()) => Ok(self.handle_batch_sent(&room_id)),
                    Err(err) => Ok(self.fail_round(&room_id, err.into())),
                }
            },
            OutboundEvent::DiscardSession { room_id } => Ok(self.handle_discard(room_id)),
            OutboundEvent::ReshareRequested { request } => Ok(self.handle_reshare(request)),
        }
    }

    fn handle_encrypt(
        &mut self,
        request_id: u64,
        room_id: RoomId,
        event_type: String,
        content: Vec<u8>,
        target_users: Vec<UserId>,
    ) -> Vec<OutboundAction> {
        let room = self.rooms.entry(room_id.clone()).or_default();
        room.waiting.push_back(QueuedEncryption {
            request_id,
            event_type,
            content,
            targets: target_users.into_iter().collect(),
        });

        if room.round.is_some() {
            return vec![OutboundAction::Log {
                level: LogLevel::Debug,
                message: format!("request {request_id} queued behind round in {room_id}"),
            }];
        }

        self.start_round(&room_id)
    }

    /// Start a round for the request at the front of the room's FIFO.
    fn start_round(&mut self, room_id: &RoomId) -> Vec<OutboundAction> {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        let Some(front) = room.waiting.front() else {
            return Vec::new();
        };

        self.next_round += 1;
        let id = self.next_round;
        let targets = front.targets.clone();
        let user_ids = targets.iter().cloned().collect();

        room.round = Some(Round { id, targets, stage: RoundStage::Resolving });

        vec![OutboundAction::ResolveDevices { room_id: room_id.clone(), round: id, user_ids }]
    }

    /// Check that a completion matches the room's round and stage.
    ///
    /// `batch` is `None` for directory answers and the batch number for send
    /// completions.
    fn expect_stage(
        &self,
        room_id: &RoomId,
        round: u64,
        batch: Option<usize>,
    ) -> Result<(), ClientError> {
        let current = self.rooms.get(room_id).and_then(|r| r.round.as_ref());
        let matches = match (current, batch) {
            (Some(r), None) => r.id == round && matches!(r.stage, RoundStage::Resolving),
            (Some(r), Some(expected)) => {
                r.id == round
                    && matches!(r.stage, RoundStage::Sharing { batch, .. } if batch == expected)
            },
            (None, _) => false,
        };

        if matches {
            Ok(())
        } else {
            Err(ClientError::StaleCompletion { room_id: room_id.clone(), round })
        }
    }

    fn handle_devices_resolved(
        &mut self,
        room_id: &RoomId,
        round: u64,
        resolved: &ResolvedDevices,
    ) -> Result<Vec<OutboundAction>, ClientError> {
        self.expect_stage(room_id, round, None)?;
        let Some(targets) =
            self.rooms.get(room_id).and_then(|r| r.round.as_ref()).map(|r| r.targets.clone())
        else {
            return Ok(Vec::new());
        };

        let in_scope = |device: &DeviceKey| {
            targets.contains(&device.user_id) && !self.identity.is_self(device)
        };

        if self.config.block_unknown_devices {
            let unknown: Vec<_> = resolved.unknown().into_iter().filter(in_scope).collect();
            if !unknown.is_empty() {
                return Ok(self.fail_round(
                    room_id,
                    CryptoError::UnknownTargetDevices { devices: unknown },
                ));
            }
        }

        let share_set: BTreeSet<DeviceKey> =
            resolved.shareable().map(DeviceInfo::key).filter(in_scope).collect();

        let mut actions = Vec::new();
        let now_ms = self.env.wall_clock_millis();
        if let Some(reason) = self.rotation_reason(room_id, &share_set, now_ms) {
            match self.create_session(room_id, &reason, now_ms) {
                Ok(created) => actions.extend(created),
                Err(err) => {
                    actions.extend(self.fail_round(room_id, err));
                    return Ok(actions);
                },
            }
        }

        let delta: Vec<DeviceKey> = match self.sessions.get(room_id) {
            Some(session) => share_set.into_iter().filter(|d| !session.is_shared_with(d)).collect(),
            None => Vec::new(),
        };

        if delta.is_empty() {
            actions.extend(self.drain(room_id));
        } else {
            actions.extend(self.begin_sharing(room_id, round, &delta));
        }
        Ok(actions)
    }

    /// Why the room's session must be replaced before this round, if at all.
    fn rotation_reason(
        &mut self,
        room_id: &RoomId,
        share_set: &BTreeSet<DeviceKey>,
        now_ms: u64,
    ) -> Option<RotationReason> {
        let discarded =
            self.rooms.get_mut(room_id).is_some_and(|r| std::mem::take(&mut r.discard_requested));
        if discarded {
            return Some(RotationReason::Discarded);
        }

        match self.sessions.get(room_id) {
            None => Some(RotationReason::NoSession),
            // Record survived a restart but the engine lost the ratchet
            Some(session) if self.engine.current_index(session.session_id()).is_err() => {
                Some(RotationReason::NoSession)
            },
            Some(session) => session.rotation_reason(&self.config, now_ms, share_set),
        }
    }

    /// Send the first batch of `delta` and move the round to sharing.
    fn begin_sharing(
        &mut self,
        room_id: &RoomId,
        round: u64,
        delta: &[DeviceKey],
    ) -> Vec<OutboundAction> {
        let Some(session) = self.sessions.get(room_id) else {
            return Vec::new();
        };
        let session_id = session.session_id().clone();

        let exported = match self.engine.export_outbound_key(&session_id) {
            Ok(exported) => exported,
            Err(err) => return self.fail_round(room_id, err.into()),
        };
        let payload = ToDeviceContent::RoomKey(RoomKey {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            room_id: room_id.clone(),
            session_id: session_id.clone(),
            session_key: exported.key,
            chain_index: exported.index,
        })
        .encode();
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => return self.fail_round(room_id, err.into()),
        };

        let mut remaining: VecDeque<_> =
            split_batches(delta, self.config.max_devices_per_batch).into();
        let Some(first) = remaining.pop_front() else {
            return self.drain(room_id);
        };

        let actions = vec![
            OutboundAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "sharing session {session_id} in {room_id} with {} device(s) in {} batch(es)",
                    delta.len(),
                    remaining.len() + 1
                ),
            },
            send_batch(room_id, round, 0, &first, &payload),
        ];

        if let Some(r) = self.rooms.get_mut(room_id).and_then(|r| r.round.as_mut()) {
            r.stage = RoundStage::Sharing {
                payload,
                chain_index: exported.index,
                in_flight: first,
                batch: 0,
                remaining,
            };
        }

        actions
    }

    /// Record the in-flight batch as shared, then send the next one or drain.
    fn handle_batch_sent(&mut self, room_id: &RoomId) -> Vec<OutboundAction> {
        let Some(round) = self.rooms.get_mut(room_id).and_then(|r| r.round.as_mut()) else {
            return Vec::new();
        };
        let RoundStage::Sharing { payload, chain_index, in_flight, batch, remaining } =
            &mut round.stage
        else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        if let Some(session) = self.sessions.get_mut(room_id) {
            session.mark_shared(in_flight.iter(), *chain_index);
            actions.push(OutboundAction::PersistOutbound(session.clone()));
        }

        match remaining.pop_front() {
            Some(next) => {
                *batch += 1;
                actions.push(send_batch(room_id, round.id, *batch, &next, payload));
                *in_flight = next;
            },
            None => actions.extend(self.drain(room_id)),
        }

        actions
    }

    /// Encrypt every queued request the finished round covers.
    ///
    /// Stops early if the session trips a rotation criterion; what is left
    /// starts the next round.
    fn drain(&mut self, room_id: &RoomId) -> Vec<OutboundAction> {
        if self.sessions.get(room_id).is_none() {
            return self.fail_round(room_id, CryptoError::RatchetEngineFault {
                reason: format!("no outbound session in {room_id}"),
            });
        }
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        let Some(round) = room.round.take() else {
            return Vec::new();
        };
        let Some(session) = self.sessions.get_mut(room_id) else {
            return Vec::new();
        };

        let now_ms = self.env.wall_clock_millis();
        let mut actions = Vec::new();
        let mut kept = VecDeque::new();
        let mut exhausted = false;

        while let Some(request) = room.waiting.pop_front() {
            if exhausted || request.targets != round.targets {
                exhausted = true;
                kept.push_back(request);
                continue;
            }

            if let Some(reason) = session.expiry_reason(&self.config, now_ms) {
                actions.push(OutboundAction::Log {
                    level: LogLevel::Info,
                    message: format!("session in {room_id} exhausted mid-drain: {reason}"),
                });
                exhausted = true;
                kept.push_back(request);
                continue;
            }

            let request_id = request.request_id;
            let result = seal(&self.engine, &self.identity, room_id, session, request);
            actions.push(OutboundAction::Completed { request_id, result });
        }

        room.waiting = kept;
        let more = !room.waiting.is_empty();
        actions.push(OutboundAction::PersistOutbound(session.clone()));

        if more {
            actions.extend(self.start_round(room_id));
        }
        actions
    }

    /// End the room's round, failing every request it covered.
    fn fail_round(&mut self, room_id: &RoomId, error: CryptoError) -> Vec<OutboundAction> {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        let Some(round) = room.round.take() else {
            return Vec::new();
        };

        let covered = room.waiting.iter().take_while(|r| r.targets == round.targets).count();
        let failed: Vec<_> = room.waiting.drain(..covered).collect();
        let more = !room.waiting.is_empty();

        let mut actions = vec![OutboundAction::Log {
            level: LogLevel::Warn,
            message: format!(
                "round {} in {room_id} failed for {} request(s): {error}",
                round.id,
                failed.len()
            ),
        }];
        actions.extend(failed.into_iter().map(|r| OutboundAction::Completed {
            request_id: r.request_id,
            result: Err(error.clone()),
        }));

        if more {
            actions.extend(self.start_round(room_id));
        }
        actions
    }

    /// Replace the room's session with a fresh one.
    fn create_session(
        &mut self,
        room_id: &RoomId,
        reason: &RotationReason,
        now_ms: u64,
    ) -> Result<Vec<OutboundAction>, CryptoError> {
        let session_id = self.engine.create_outbound(room_id)?;
        let exported = self.engine.export_outbound_key(&session_id)?;

        let session = OutboundGroupSession::new(session_id.clone(), room_id.clone(), now_ms);
        let own = InboundGroupSession {
            session_id: session_id.clone(),
            sender_key: self.identity.curve25519.clone(),
            room_id: room_id.clone(),
            forwarding_chain: Vec::new(),
            claimed_keys: BTreeMap::from([(ED25519.to_string(), self.identity.ed25519.clone())]),
            export_format: false,
            first_known_index: exported.index,
        };

        let previous = self.sessions.replace(session.clone());
        let message = match previous {
            Some(old) => {
                format!("rotated {} to {session_id} in {room_id}: {reason}", old.session_id())
            },
            None => format!("created session {session_id} in {room_id}: {reason}"),
        };

        Ok(vec![
            OutboundAction::Log { level: LogLevel::Info, message },
            OutboundAction::PersistOutbound(session),
            OutboundAction::InstallOwnSession { session: own, session_key: exported.key },
        ])
    }

    fn handle_discard(&mut self, room_id: RoomId) -> Vec<OutboundAction> {
        let message = format!("outbound session in {room_id} discarded");
        self.rooms.entry(room_id).or_default().discard_requested = true;
        vec![OutboundAction::Log { level: LogLevel::Info, message }]
    }

    /// Answer another user's request for one of our session keys.
    ///
    /// Only a device that was sent the current session gets it back, and only
    /// from the index it was originally sent.
    fn handle_reshare(&self, request: KeyShareRequestKey) -> Vec<OutboundAction> {
        let device = DeviceKey {
            user_id: request.requesting_user.clone(),
            device_id: request.requesting_device.clone(),
        };

        let shared_index = self
            .sessions
            .get(&request.room_id)
            .filter(|s| {
                s.session_id() == &request.session_id
                    && request.sender_key == self.identity.curve25519
            })
            .and_then(|s| s.shared_index(&device));

        let Some(index) = shared_index else {
            return vec![
                OutboundAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "refusing {device} session {}: never shared with it",
                        request.session_id
                    ),
                },
                withhold(device, request, WithheldCode::Unauthorised),
            ];
        };

        match self.engine.export_inbound_key(
            &request.room_id,
            &request.sender_key,
            &request.session_id,
            Some(index),
        ) {
            Ok(exported) => {
                let content = ForwardedRoomKey {
                    algorithm: MEGOLM_ALGORITHM.to_string(),
                    room_id: request.room_id.clone(),
                    session_id: request.session_id.clone(),
                    session_key: exported.key,
                    chain_index: exported.index,
                    sender_key: Some(self.identity.curve25519.clone()),
                    sender_claimed_ed25519_key: Some(self.identity.ed25519.clone()),
                    forwarding_curve25519_key_chain: Vec::new(),
                };
                vec![OutboundAction::ShareKey(KeyShare { device, content, request })]
            },
            Err(err) => vec![
                OutboundAction::Log {
                    level: LogLevel::Warn,
                    message: format!("cannot export {} for {device}: {err}", request.session_id),
                },
                withhold(device, request, WithheldCode::Unavailable),
            ],
        }
    }
}

fn send_batch(
    room_id: &RoomId,
    round: u64,
    batch: usize,
    devices: &[DeviceKey],
    payload: &[u8],
) -> OutboundAction {
    let mut messages = ToDeviceMessages::new();
    for device in devices {
        messages.insert(device, payload.to_vec());
    }
    OutboundAction::SendRoomKeys { room_id: room_id.clone(), round, batch, messages }
}

fn withhold(device: DeviceKey, request: KeyShareRequestKey, code: WithheldCode) -> OutboundAction {
    let notice = RoomKeyWithheld {
        algorithm: MEGOLM_ALGORITHM.to_string(),
        room_id: request.room_id.clone(),
        session_id: request.session_id.clone(),
        sender_key: request.sender_key.clone(),
        code,
        reason: None,
    };
    OutboundAction::Withhold { device, notice, request }
}

/// Encrypt one request with the room's session.
fn seal<R: RatchetEngine>(
    engine: &R,
    identity: &DeviceIdentity,
    room_id: &RoomId,
    session: &mut OutboundGroupSession,
    request: QueuedEncryption,
) -> Result<EncryptedEnvelope, CryptoError> {
    let plaintext = RoomPlaintext {
        room_id: room_id.clone(),
        event_type: request.event_type,
        content: request.content,
    }
    .encode()?;

    let ciphertext = engine.encrypt(session.session_id(), &plaintext)?;
    session.record_use();

    Ok(EncryptedEnvelope {
        algorithm: Some(MEGOLM_ALGORITHM.to_string()),
        sender_key: Some(identity.curve25519.clone()),
        ciphertext: Some(ciphertext),
        session_id: Some(session.session_id().clone()),
        device_id: Some(identity.device_id.clone()),
    })
}
