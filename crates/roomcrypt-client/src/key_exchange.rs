//! Key exchange: handling of incoming to-device key traffic.
//!
//! Key announcements and forwarded keys install inbound sessions; key requests
//! from our own devices are answered here, those from other users are handed
//! to the outbound side; withheld notices settle our own requests.
//!
//! # Security
//!
//! - A forwarded key must name the session originator (`sender_key`) and the
//!   signing key it claimed. The relay's curve key is appended to the
//!   forwarding chain, so a reader can tell a forwarded session from one
//!   received from its originator.
//! - Keys only go to a device over a secure channel. The driver checks
//!   [`roomcrypt_core::DeviceMessenger::has_secure_channel`] before sending a
//!   [`DecryptorAction::ShareKey`].

use std::collections::BTreeMap;

use roomcrypt_core::{
    Environment, InboundGroupSession, InboundSessionKey, InstallOutcome, KeyShareOutcome,
    KeyShareRequestKey, RatchetEngine,
};
use roomcrypt_proto::{
    Curve25519Key, DeviceKey, ED25519, Ed25519Key, ForwardedRoomKey, KeyRequestAction,
    MEGOLM_ALGORITHM, RoomKey, RoomKeyRequest, RoomKeyWithheld, ToDeviceContent, UserId,
};

use crate::{
    decryptor::Decryptor,
    error::ClientError,
    event::{DecryptorAction, KeyShare, LogLevel, ShareOutcome},
};

fn log(level: LogLevel, message: String) -> DecryptorAction {
    DecryptorAction::Log { level, message }
}

impl<E: Environment, R: RatchetEngine> Decryptor<E, R> {
    pub(crate) fn handle_to_device(
        &mut self,
        sender: &UserId,
        sender_key: Curve25519Key,
        sender_ed25519: Option<Ed25519Key>,
        event_type: &str,
        content: &[u8],
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        let content = match ToDeviceContent::decode(event_type, content) {
            Ok(content) => content,
            Err(err) => {
                return Ok(vec![log(
                    LogLevel::Warn,
                    format!("dropping {event_type} from {sender}: {err}"),
                )]);
            },
        };

        match content {
            ToDeviceContent::RoomKey(key) => self.on_room_key(sender_key, sender_ed25519, key),
            ToDeviceContent::ForwardedRoomKey(key) => self.on_forwarded_key(sender_key, key),
            ToDeviceContent::RoomKeyRequest(request) => Ok(self.on_key_request(sender, request)),
            ToDeviceContent::Withheld(notice) => Ok(self.on_withheld(sender, &notice)),
        }
    }

    /// Key announcement straight from the session originator.
    fn on_room_key(
        &mut self,
        sender_key: Curve25519Key,
        sender_ed25519: Option<Ed25519Key>,
        key: RoomKey,
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        if key.algorithm != MEGOLM_ALGORITHM
            || key.room_id.is_empty()
            || key.session_id.is_empty()
            || key.session_key.is_empty()
        {
            return Ok(vec![log(
                LogLevel::Warn,
                format!("rejecting room_key from {sender_key}: missing fields"),
            )]);
        }

        let record = InboundGroupSession {
            session_id: key.session_id,
            sender_key,
            room_id: key.room_id,
            forwarding_chain: Vec::new(),
            claimed_keys: sender_ed25519
                .map(|k| BTreeMap::from([(ED25519.to_string(), k)]))
                .unwrap_or_default(),
            export_format: false,
            first_known_index: key.chain_index,
        };

        self.install(record, &key.session_key)
    }

    /// Key relayed by a device other than the originator.
    fn on_forwarded_key(
        &mut self,
        relay_key: Curve25519Key,
        key: ForwardedRoomKey,
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        let ForwardedRoomKey {
            algorithm,
            room_id,
            session_id,
            session_key,
            chain_index,
            sender_key,
            sender_claimed_ed25519_key,
            mut forwarding_curve25519_key_chain,
        } = key;

        let (Some(sender_key), Some(claimed)) = (sender_key, sender_claimed_ed25519_key) else {
            return Ok(vec![log(
                LogLevel::Warn,
                format!("rejecting forwarded key from {relay_key}: originator keys missing"),
            )]);
        };
        if algorithm != MEGOLM_ALGORITHM
            || room_id.is_empty()
            || session_id.is_empty()
            || session_key.is_empty()
        {
            return Ok(vec![log(
                LogLevel::Warn,
                format!("rejecting forwarded key from {relay_key}: missing fields"),
            )]);
        }

        forwarding_curve25519_key_chain.push(relay_key);

        let record = InboundGroupSession {
            session_id,
            sender_key,
            room_id,
            forwarding_chain: forwarding_curve25519_key_chain,
            claimed_keys: BTreeMap::from([(ED25519.to_string(), claimed)]),
            export_format: true,
            first_known_index: chain_index,
        };

        self.install(record, &session_key)
    }

    /// Install an inbound session unless a record at least as capable exists,
    /// then cancel our request for it and retry what was waiting.
    pub(crate) fn install(
        &mut self,
        record: InboundGroupSession,
        session_key: &str,
    ) -> Result<Vec<DecryptorAction>, ClientError> {
        let outcome = self.sessions.plan_install(&record.key(), record.first_known_index);
        let held = self.engine.has_keys(&record.room_id, &record.sender_key, &record.session_id);
        let message = match outcome {
            // Record survived a restart but the ratchet did not
            InstallOutcome::KeptExisting { existing_index } if !held => {
                self.sessions.remove(&record.key());
                format!(
                    "restored ratchet for {} at index {}, record had index {existing_index}",
                    record.session_id, record.first_known_index
                )
            },
            InstallOutcome::KeptExisting { existing_index } => {
                return Ok(vec![log(
                    LogLevel::Debug,
                    format!(
                        "kept {} from index {existing_index}, offered index {}",
                        record.session_id, record.first_known_index
                    ),
                )]);
            },
            InstallOutcome::Installed => format!(
                "installed {} from {} at index {}",
                record.session_id, record.sender_key, record.first_known_index
            ),
            InstallOutcome::Replaced { previous_index } => format!(
                "replaced {} index {previous_index} with index {}",
                record.session_id, record.first_known_index
            ),
        };

        if let Err(err) = self.engine.install_inbound(&record, session_key) {
            return Ok(vec![log(
                LogLevel::Warn,
                format!("engine rejected key for {}: {err}", record.session_id),
            )]);
        }

        let (room_id, sender_key, session_id) =
            (record.room_id.clone(), record.sender_key.clone(), record.session_id.clone());
        self.sessions.insert(record.clone());

        let mut actions =
            vec![log(LogLevel::Info, message), DecryptorAction::PersistInbound(record)];
        actions.extend(self.cancel_own_request(&room_id, &sender_key, &session_id)?);
        actions.extend(self.retry_pending(&sender_key, &session_id));

        Ok(actions)
    }

    fn on_key_request(&mut self, sender: &UserId, request: RoomKeyRequest) -> Vec<DecryptorAction> {
        let device =
            DeviceKey { user_id: sender.clone(), device_id: request.requesting_device_id.clone() };
        if self.identity.is_self(&device) {
            return Vec::new();
        }

        match request.action {
            KeyRequestAction::RequestCancellation => {
                let tracked = self.requests.find_by_request_id(
                    sender,
                    &request.requesting_device_id,
                    &request.request_id,
                );
                match tracked.filter(|key| self.requests.is_pending(key)) {
                    Some(key) => {
                        self.requests.remove(&key);
                        vec![log(
                            LogLevel::Debug,
                            format!("{device} cancelled request {}", request.request_id),
                        )]
                    },
                    None => Vec::new(),
                }
            },
            KeyRequestAction::Request => self.on_share_request(device, request),
        }
    }

    fn on_share_request(
        &mut self,
        device: DeviceKey,
        request: RoomKeyRequest,
    ) -> Vec<DecryptorAction> {
        let Some(body) = request.body.filter(|b| b.algorithm == MEGOLM_ALGORITHM) else {
            return vec![log(
                LogLevel::Warn,
                format!("ignoring request {} from {device}: no usable body", request.request_id),
            )];
        };

        let key = KeyShareRequestKey {
            requesting_user: device.user_id.clone(),
            requesting_device: device.device_id.clone(),
            room_id: body.room_id,
            sender_key: body.sender_key,
            session_id: body.session_id,
        };

        if !self.requests.begin(key.clone(), request.request_id, vec![device.clone()]) {
            return vec![log(
                LogLevel::Debug,
                format!("duplicate key request from {device} for {}", key.session_id),
            )];
        }

        if device.user_id != self.identity.user_id {
            return vec![
                log(
                    LogLevel::Debug,
                    format!("routing {device} request for {} to outbound side", key.session_id),
                ),
                DecryptorAction::ReshareRequested { request: key },
            ];
        }

        if !self.config.share_with_own_devices {
            self.requests.settle(&key, KeyShareOutcome::Declined);
            return vec![log(
                LogLevel::Debug,
                format!("not sharing {} with own device {device}", key.session_id),
            )];
        }

        match self.forwardable(&key) {
            Some(content) => vec![
                log(LogLevel::Info, format!("sharing {} with own device {device}", key.session_id)),
                DecryptorAction::ShareKey(KeyShare { device, content, request: key }),
            ],
            None => {
                self.requests.settle(&key, KeyShareOutcome::Declined);
                vec![log(
                    LogLevel::Debug,
                    format!("{device} asked for {}, which we cannot export", key.session_id),
                )]
            },
        }
    }

    /// Export form of a held session, ready to forward.
    fn forwardable(&self, key: &KeyShareRequestKey) -> Option<ForwardedRoomKey> {
        let record = self.sessions.get(&InboundSessionKey {
            sender_key: key.sender_key.clone(),
            session_id: key.session_id.clone(),
            room_id: key.room_id.clone(),
        })?;

        let exported = self
            .engine
            .export_inbound_key(&record.room_id, &record.sender_key, &record.session_id, None)
            .ok()?;

        Some(ForwardedRoomKey {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            room_id: record.room_id.clone(),
            session_id: record.session_id.clone(),
            session_key: exported.key,
            chain_index: exported.index,
            sender_key: Some(record.sender_key.clone()),
            sender_claimed_ed25519_key: record.claimed_ed25519().cloned(),
            forwarding_curve25519_key_chain: record.forwarding_chain.clone(),
        })
    }

    fn on_withheld(&mut self, sender: &UserId, notice: &RoomKeyWithheld) -> Vec<DecryptorAction> {
        let key = self.own_request(&notice.room_id, &notice.sender_key, &notice.session_id);

        match self.requests.settle(&key, KeyShareOutcome::Declined) {
            Some(_) => vec![log(
                LogLevel::Info,
                format!("{sender} withheld {} ({:?})", notice.session_id, notice.code),
            )],
            None => Vec::new(),
        }
    }

    pub(crate) fn handle_share_finished(
        &mut self,
        request: &KeyShareRequestKey,
        outcome: ShareOutcome,
    ) -> Vec<DecryptorAction> {
        match outcome {
            ShareOutcome::Shared => {
                self.requests.settle(request, KeyShareOutcome::Satisfied);
                Vec::new()
            },
            ShareOutcome::Declined => {
                self.requests.settle(request, KeyShareOutcome::Declined);
                Vec::new()
            },
            ShareOutcome::NoChannel => {
                self.requests.remove(request);
                vec![log(
                    LogLevel::Debug,
                    format!(
                        "no secure channel to {}:{}, key not shared",
                        request.requesting_user, request.requesting_device
                    ),
                )]
            },
            ShareOutcome::Failed(err) => {
                self.requests.remove(request);
                vec![log(
                    LogLevel::Warn,
                    format!("sharing {} failed: {err}", request.session_id),
                )]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use roomcrypt_core::{DecryptionConfig, InboundSessions, TransportError};
    use roomcrypt_harness::SimEnv;
    use roomcrypt_proto::{DeviceId, RequestedKeyInfo, SessionId, WithheldCode};
    use roomcrypt_ratchet::SymmetricRatchetEngine;

    use super::*;
    use crate::{
        event::DecryptorEvent,
        testing::{ALICE, BOB, Sender, bob, decryptor, deliver, deliver_room_key, request, room},
    };

    const LAPTOP: &str = "bob-laptop-curve";

    fn key_request(device: &str, request_id: &str, session_id: &SessionId) -> ToDeviceContent {
        ToDeviceContent::RoomKeyRequest(RoomKeyRequest {
            action: KeyRequestAction::Request,
            requesting_device_id: DeviceId::from(device),
            request_id: request_id.to_string(),
            body: Some(RequestedKeyInfo {
                algorithm: MEGOLM_ALGORITHM.to_string(),
                room_id: room(),
                sender_key: Sender::curve(),
                session_id: session_id.clone(),
            }),
        })
    }

    fn cancellation(device: &str, request_id: &str) -> ToDeviceContent {
        ToDeviceContent::RoomKeyRequest(RoomKeyRequest {
            action: KeyRequestAction::RequestCancellation,
            requesting_device_id: DeviceId::from(device),
            request_id: request_id.to_string(),
            body: None,
        })
    }

    fn incoming(user: &str, device: &str, sender: &Sender) -> KeyShareRequestKey {
        KeyShareRequestKey {
            requesting_user: UserId::from(user),
            requesting_device: DeviceId::from(device),
            room_id: room(),
            sender_key: Sender::curve(),
            session_id: sender.session_id.clone(),
        }
    }

    fn session_key(sender: &Sender) -> InboundSessionKey {
        InboundSessionKey {
            sender_key: Sender::curve(),
            session_id: sender.session_id.clone(),
            room_id: room(),
        }
    }

    fn persisted(actions: &[DecryptorAction]) -> usize {
        actions.iter().filter(|a| matches!(a, DecryptorAction::PersistInbound(_))).count()
    }

    #[test]
    fn forwarded_key_records_relay_chain() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());

        let forwarded = sender.forwarded_key(&["relay-a-curve"]);
        let actions = deliver(&mut d, BOB, "relay-b-curve", &forwarded);
        assert_eq!(persisted(&actions), 1);

        let record = d.sessions().get(&session_key(&sender)).unwrap();
        assert!(record.export_format);
        assert_eq!(record.claimed_ed25519(), Some(&Ed25519Key::from("alice-ed")));

        let event = d.decrypt(request("$1", sender.seal("relayed"))).0.unwrap();
        let chain: Vec<_> = event.forwarding_chain.iter().map(Curve25519Key::as_str).collect();
        assert_eq!(chain, ["relay-a-curve", "relay-b-curve"]);
        assert_eq!(event.sender_key, Sender::curve());
    }

    #[test]
    fn forwarded_key_without_originator_is_rejected() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        let ToDeviceContent::ForwardedRoomKey(mut key) = sender.forwarded_key(&[]) else {
            panic!("expected forwarded key");
        };
        key.sender_claimed_ed25519_key = None;

        let forwarded = ToDeviceContent::ForwardedRoomKey(key);
        let actions = deliver(&mut d, BOB, "relay-curve", &forwarded);

        assert_eq!(persisted(&actions), 0);
        assert!(d.sessions().is_empty());
    }

    #[test]
    fn repeated_announcement_is_idempotent() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());

        assert_eq!(persisted(&deliver_room_key(&mut d, &sender)), 1);
        let again = deliver_room_key(&mut d, &sender);

        assert_eq!(persisted(&again), 0);
        assert!(matches!(again[..], [DecryptorAction::Log { level: LogLevel::Debug, .. }]));
        assert_eq!(d.sessions().len(), 1);
    }

    #[test]
    fn later_announcement_does_not_replace_earlier_key() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver_room_key(&mut d, &sender);
        let first = sender.seal("zero");
        sender.seal("one");

        assert_eq!(persisted(&deliver_room_key(&mut d, &sender)), 0);
        assert!(d.decrypt(request("$0", first)).0.is_ok());
    }

    #[test]
    fn record_without_ratchet_is_restored() {
        let sender = Sender::new();
        let ToDeviceContent::RoomKey(announced) = sender.room_key() else {
            panic!("expected room key");
        };
        let mut sessions = InboundSessions::new();
        sessions.insert(InboundGroupSession {
            session_id: sender.session_id.clone(),
            sender_key: Sender::curve(),
            room_id: room(),
            forwarding_chain: Vec::new(),
            claimed_keys: BTreeMap::new(),
            export_format: false,
            first_known_index: 0,
        });
        let env = SimEnv::with_seed(3);
        let engine = SymmetricRatchetEngine::new(env.clone());
        let mut d = Decryptor::new(env, engine, bob(), DecryptionConfig::default(), sessions);

        let envelope = sender.seal("after restart");
        assert!(d.decrypt(request("$1", envelope)).0.unwrap_err().queued);

        let actions =
            deliver(&mut d, ALICE, "alice-curve", &ToDeviceContent::RoomKey(announced));

        assert_eq!(persisted(&actions), 1);
        assert!(
            actions.iter().any(|a| matches!(a, DecryptorAction::Redecrypted { result: Ok(_), .. }))
        );
    }

    #[test]
    fn own_device_request_is_answered_with_forwarded_key() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver_room_key(&mut d, &sender);

        let actions = deliver(&mut d, BOB, LAPTOP, &key_request("B2", "r1", &sender.session_id));

        let Some(DecryptorAction::ShareKey(share)) = actions.last() else {
            panic!("expected share, got {actions:?}");
        };
        assert_eq!(share.device, DeviceKey::new(BOB, "B2"));
        assert_eq!(share.content.sender_key, Some(Sender::curve()));
        assert_eq!(share.content.sender_claimed_ed25519_key, Some("alice-ed".into()));
        assert_eq!(share.content.chain_index, 0);
        assert!(d.requests().is_pending(&share.request));

        d.handle(DecryptorEvent::KeyShareFinished {
            request: share.request.clone(),
            outcome: ShareOutcome::Shared,
        })
        .unwrap();
        assert_eq!(
            d.requests().get(&share.request).map(|s| s.outcome),
            Some(KeyShareOutcome::Satisfied)
        );
    }

    #[test]
    fn own_device_request_declined_when_sharing_disabled() {
        let sender = Sender::new();
        let config =
            DecryptionConfig { share_with_own_devices: false, ..DecryptionConfig::default() };
        let mut d = decryptor(bob(), config);
        deliver_room_key(&mut d, &sender);

        let actions = deliver(&mut d, BOB, LAPTOP, &key_request("B2", "r1", &sender.session_id));

        assert!(!actions.iter().any(|a| matches!(a, DecryptorAction::ShareKey(_))));
        assert_eq!(
            d.requests().get(&incoming(BOB, "B2", &sender)).map(|s| s.outcome),
            Some(KeyShareOutcome::Declined)
        );
    }

    #[test]
    fn own_device_request_for_unknown_session_is_declined() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());

        let actions = deliver(&mut d, BOB, LAPTOP, &key_request("B2", "r1", &sender.session_id));

        assert!(!actions.iter().any(|a| matches!(a, DecryptorAction::ShareKey(_))));
        assert!(!d.requests().is_pending(&incoming(BOB, "B2", &sender)));
    }

    #[test]
    fn other_user_request_goes_to_outbound_side_once() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        let content = key_request("C1", "r1", &sender.session_id);

        let first = deliver(&mut d, "@carol:x", "carol-curve", &content);
        let duplicate = deliver(&mut d, "@carol:x", "carol-curve", &content);

        assert!(matches!(first.last(), Some(DecryptorAction::ReshareRequested { .. })));
        assert!(!duplicate.iter().any(|a| matches!(a, DecryptorAction::ReshareRequested { .. })));

        d.handle(DecryptorEvent::KeyShareFinished {
            request: incoming("@carol:x", "C1", &sender),
            outcome: ShareOutcome::Declined,
        })
        .unwrap();
        let after_settle = deliver(&mut d, "@carol:x", "carol-curve", &content);
        assert!(matches!(after_settle.last(), Some(DecryptorAction::ReshareRequested { .. })));
    }

    #[test]
    fn cancellation_drops_pending_request() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver(&mut d, "@carol:x", "carol-curve", &key_request("C1", "r1", &sender.session_id));
        assert!(d.requests().is_pending(&incoming("@carol:x", "C1", &sender)));

        deliver(&mut d, "@carol:x", "carol-curve", &cancellation("C1", "other-id"));
        assert!(d.requests().is_pending(&incoming("@carol:x", "C1", &sender)));

        deliver(&mut d, "@carol:x", "carol-curve", &cancellation("C1", "r1"));
        assert!(d.requests().get(&incoming("@carol:x", "C1", &sender)).is_none());
    }

    #[test]
    fn no_channel_forgets_request() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver_room_key(&mut d, &sender);
        deliver(&mut d, BOB, LAPTOP, &key_request("B2", "r1", &sender.session_id));

        d.handle(DecryptorEvent::KeyShareFinished {
            request: incoming(BOB, "B2", &sender),
            outcome: ShareOutcome::NoChannel,
        })
        .unwrap();

        assert!(d.requests().get(&incoming(BOB, "B2", &sender)).is_none());
        let retry = deliver(&mut d, BOB, LAPTOP, &key_request("B2", "r2", &sender.session_id));
        assert!(matches!(retry.last(), Some(DecryptorAction::ShareKey(_))));
    }

    #[test]
    fn request_from_ourselves_is_ignored() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver_room_key(&mut d, &sender);

        let own = key_request("B1", "r1", &sender.session_id);
        let actions = deliver(&mut d, BOB, "bob-curve", &own);

        assert!(actions.is_empty());
    }

    #[test]
    fn withheld_notice_settles_own_request() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        let _ = d.decrypt(request("$1", sender.seal("locked")));
        let own = d.own_request(&room(), &Sender::curve(), &sender.session_id);
        assert!(d.requests().is_pending(&own));

        let notice = ToDeviceContent::Withheld(RoomKeyWithheld {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            room_id: room(),
            session_id: sender.session_id.clone(),
            sender_key: Sender::curve(),
            code: WithheldCode::Unauthorised,
            reason: None,
        });
        deliver(&mut d, ALICE, "alice-curve", &notice);

        assert_eq!(d.requests().get(&own).map(|s| s.outcome), Some(KeyShareOutcome::Declined));
        assert_eq!(d.pending().len(), 1);
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let mut d = decryptor(bob(), DecryptionConfig::default());

        let actions = d
            .handle(DecryptorEvent::ToDeviceReceived {
                sender: UserId::from(ALICE),
                sender_key: Sender::curve(),
                sender_ed25519: None,
                event_type: ToDeviceContent::ROOM_KEY.to_string(),
                content: vec![0xFF, 0x00],
            })
            .unwrap();

        assert!(matches!(actions[..], [DecryptorAction::Log { level: LogLevel::Warn, .. }]));
        assert!(d.sessions().is_empty());
    }

    #[test]
    fn failed_share_forgets_request() {
        let sender = Sender::new();
        let mut d = decryptor(bob(), DecryptionConfig::default());
        deliver(&mut d, "@carol:x", "carol-curve", &key_request("C1", "r1", &sender.session_id));

        d.handle(DecryptorEvent::KeyShareFinished {
            request: incoming("@carol:x", "C1", &sender),
            outcome: ShareOutcome::Failed(TransportError::SendFailed("503".into())),
        })
        .unwrap();

        assert!(d.requests().get(&incoming("@carol:x", "C1", &sender)).is_none());
    }
}
