//! Multi-user room scenario.
//!
//! Every device of every user joins one room. Users take turns sending,
//! rotating through their devices, and every other device decrypts every
//! event. Run inside a turmoil client so time is virtual.

use std::time::Duration;

use roomcrypt_core::{CryptoError, DeviceTrust};
use roomcrypt_proto::{EncryptedEnvelope, RoomId, ToDeviceContent, UserId};
use roomcrypt_runtime::RuntimeConfig;

use crate::{SimDevice, SimDirectory, SimEnv, SimNetwork, device_info, room_event, sim_identity};

/// Room every scenario device joins.
pub const SCENARIO_ROOM: &str = "!scenario:roomcrypt";

/// Time given to the inbox pumps between sending and decrypting.
const SETTLE: Duration = Duration::from_millis(50);

/// Scenario shape.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of users
    pub users: usize,
    /// Devices per user
    pub devices_per_user: usize,
    /// Messages each user sends
    pub messages_per_user: usize,
    /// RNG seed
    pub seed: u64,
    /// Worker and policy configuration for every device
    pub runtime: RuntimeConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            users: 3,
            devices_per_user: 2,
            messages_per_user: 5,
            seed: 0x5eed,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Events encrypted
    pub encrypted: usize,
    /// Successful decryptions with matching cleartext
    pub decrypted: usize,
    /// Decryptions that failed or returned the wrong cleartext
    pub failed: usize,
    /// `room_key` deliveries (one per receiving device)
    pub room_keys_delivered: usize,
    /// Distinct sessions seen across all events
    pub sessions: usize,
}

struct SentEvent {
    event_id: String,
    sender: UserId,
    sender_device: usize,
    content: Vec<u8>,
    envelope: EncryptedEnvelope,
}

/// Run the room scenario.
///
/// # Errors
///
/// Returns the first encryption failure, or a storage error if a device
/// cannot start.
pub async fn run_room_scenario(config: &ScenarioConfig) -> Result<ScenarioReport, CryptoError> {
    let env = SimEnv::with_seed(config.seed);
    let network = SimNetwork::new();
    let directory = SimDirectory::new();
    let room = RoomId::from(SCENARIO_ROOM);

    let users: Vec<UserId> =
        (0..config.users).map(|u| UserId::from(format!("@user{u}:roomcrypt"))).collect();

    let mut devices = Vec::new();
    for user in &users {
        for d in 0..config.devices_per_user {
            let identity = sim_identity(user.as_str(), &format!("DEVICE{d}"));
            directory.add_device(device_info(&identity, DeviceTrust::Known));
            devices.push(identity);
        }
    }
    let devices = devices
        .into_iter()
        .map(|identity| {
            SimDevice::start(identity, &env, &network, &directory, config.runtime.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut sent = Vec::new();
    for round in 0..config.messages_per_user {
        for (u, user) in users.iter().enumerate() {
            let sender_device = u * config.devices_per_user + round % config.devices_per_user;
            let content = format!("{user} message {round}").into_bytes();
            let envelope = devices[sender_device]
                .handle
                .encrypt(room.clone(), "m.room.message", content.clone(), users.clone())
                .await?;
            sent.push(SentEvent {
                event_id: format!("$e{}", sent.len()),
                sender: user.clone(),
                sender_device,
                content,
                envelope,
            });
        }
    }
    tracing::info!("encrypted {} event(s)", sent.len());

    tokio::time::sleep(SETTLE).await;

    let mut report = ScenarioReport { encrypted: sent.len(), ..ScenarioReport::default() };
    for (index, device) in devices.iter().enumerate() {
        for event in sent.iter().filter(|e| e.sender_device != index) {
            let request =
                room_event(&event.event_id, &room, &event.sender, event.envelope.clone());
            match device.handle.decrypt(request).await {
                Ok(decrypted) if decrypted.content == event.content => report.decrypted += 1,
                Ok(_) => report.failed += 1,
                Err(failure) => {
                    let device_key = device.identity.device_key();
                    tracing::warn!("{} failed {}: {}", device_key, event.event_id, failure);
                    report.failed += 1;
                },
            }
        }
    }

    let mut sessions: Vec<_> = sent.iter().filter_map(|e| e.envelope.session_id.clone()).collect();
    sessions.sort();
    sessions.dedup();
    report.sessions = sessions.len();
    report.room_keys_delivered = network
        .sent_of_type(ToDeviceContent::ROOM_KEY)
        .iter()
        .map(|m| m.to.len())
        .sum();

    Ok(report)
}
