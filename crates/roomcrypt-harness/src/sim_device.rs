//! A complete simulated device: runtime, ratchet engine, store and inbox
//! pump, wired to a [`SimNetwork`] and a [`SimDirectory`].

use std::time::Duration;

use roomcrypt_client::{DecryptRequest, DeviceIdentity};
use roomcrypt_core::{DeviceInfo, DeviceTrust, StorageError};
use roomcrypt_proto::{EncryptedEnvelope, EventId, RoomId, TimelineId, UserId};
use roomcrypt_ratchet::SymmetricRatchetEngine;
use roomcrypt_runtime::{Collaborators, CryptoHandle, MemoryStore, Redecrypted, RuntimeConfig};
use tokio::sync::mpsc;

use crate::{SimDirectory, SimEnv, SimNetwork};

/// Timeline every simulated event is displayed in.
pub const MAIN_TIMELINE: &str = "main";

/// Deterministic identity for `device_id` of `user_id`.
pub fn sim_identity(user_id: &str, device_id: &str) -> DeviceIdentity {
    DeviceIdentity::new(
        user_id,
        device_id,
        format!("curve:{user_id}:{device_id}"),
        format!("ed:{user_id}:{device_id}"),
    )
}

/// Directory entry publishing `identity` with the given trust.
pub fn device_info(identity: &DeviceIdentity, trust: DeviceTrust) -> DeviceInfo {
    DeviceInfo {
        user_id: identity.user_id.clone(),
        device_id: identity.device_id.clone(),
        curve25519: identity.curve25519.clone(),
        ed25519: identity.ed25519.clone(),
        trust,
    }
}

/// Decrypt request for an envelope received in `room_id`'s main timeline.
pub fn room_event(
    event_id: &str,
    room_id: &RoomId,
    sender: &UserId,
    envelope: EncryptedEnvelope,
) -> DecryptRequest {
    DecryptRequest {
        event_id: EventId::from(event_id),
        room_id: room_id.clone(),
        timeline_id: TimelineId::from(MAIN_TIMELINE),
        sender: sender.clone(),
        envelope,
    }
}

/// One running device.
///
/// Incoming to-device messages are pumped from the network into the
/// runtime by a background task. The pump stops when the device reconnects
/// (restart) or the network is dropped.
pub struct SimDevice {
    /// Who this device is
    pub identity: DeviceIdentity,
    /// Runtime API
    pub handle: CryptoHandle,
    /// Events decrypted after their key arrived
    pub completions: mpsc::UnboundedReceiver<Redecrypted>,
    /// Persisted session records
    pub store: MemoryStore,
    /// Ratchet state (not persisted)
    pub engine: SymmetricRatchetEngine<SimEnv>,
}

impl SimDevice {
    /// Start a device with an empty store.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading fails.
    pub fn start(
        identity: DeviceIdentity,
        env: &SimEnv,
        network: &SimNetwork,
        directory: &SimDirectory,
        config: RuntimeConfig,
    ) -> Result<Self, StorageError> {
        Self::start_with_store(identity, MemoryStore::new(), env, network, directory, config)
    }

    /// Start a device over existing session records.
    ///
    /// The ratchet engine always starts empty, as after a process restart.
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading fails.
    pub fn start_with_store(
        identity: DeviceIdentity,
        store: MemoryStore,
        env: &SimEnv,
        network: &SimNetwork,
        directory: &SimDirectory,
        config: RuntimeConfig,
    ) -> Result<Self, StorageError> {
        let engine = SymmetricRatchetEngine::new(env.clone());
        let collaborators = Collaborators {
            directory: directory.clone(),
            messenger: network.messenger(&identity),
            store: store.clone(),
        };
        let (handle, completions) = roomcrypt_runtime::start(
            env.clone(),
            engine.clone(),
            identity.clone(),
            collaborators,
            config,
        )?;

        let mut inbox = network.connect(&identity.device_key());
        let pump = handle.clone();
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                let received = pump
                    .receive_to_device(
                        delivery.sender,
                        delivery.sender_key,
                        Some(delivery.sender_ed25519),
                        delivery.event_type,
                        delivery.content,
                    )
                    .await;
                if received.is_err() {
                    break;
                }
            }
        });

        Ok(Self { identity, handle, completions, store, engine })
    }

    /// Stop this device and start it again over the same store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading fails.
    pub fn restart(
        self,
        env: &SimEnv,
        network: &SimNetwork,
        directory: &SimDirectory,
        config: RuntimeConfig,
    ) -> Result<Self, StorageError> {
        let Self { identity, store, .. } = self;
        Self::start_with_store(identity, store, env, network, directory, config)
    }

    /// Next re-decrypted event, if one is already waiting.
    pub fn try_completion(&mut self) -> Option<Redecrypted> {
        self.completions.try_recv().ok()
    }

    /// Wait up to `within` for the next re-decrypted event.
    pub async fn next_completion(&mut self, within: Duration) -> Option<Redecrypted> {
        tokio::time::timeout(within, self.completions.recv()).await.ok().flatten()
    }
}
