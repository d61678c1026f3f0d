//! Simulated to-device network.
//!
//! Every device gets a [`SimMessenger`] bound to its identity. Sends are
//! routed into per-device inboxes; a device that is not connected yet finds
//! its messages waiting when it connects. Delivery to a device can be held
//! back and released later; sends and channel checks can be made to fail.

#![allow(clippy::disallowed_types, reason = "Synchronous routing table only")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use roomcrypt_client::DeviceIdentity;
use roomcrypt_core::{DeviceMessenger, ToDeviceMessages, TransportError};
use roomcrypt_proto::{Curve25519Key, DeviceId, DeviceKey, Ed25519Key, UserId};
use tokio::sync::mpsc;

/// A to-device message as the receiving device sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sending user
    pub sender: UserId,
    /// Sending device's curve key (secure channel identity)
    pub sender_key: Curve25519Key,
    /// Sending device's signing key
    pub sender_ed25519: Ed25519Key,
    /// Event type
    pub event_type: String,
    /// Encoded content
    pub content: Vec<u8>,
}

/// One accepted send, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Sending device
    pub from: DeviceKey,
    /// Event type
    pub event_type: String,
    /// Devices the message reached
    pub to: Vec<DeviceKey>,
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<DeviceKey, mpsc::UnboundedSender<Delivery>>,
    /// Messages for devices that have not connected
    parked: HashMap<DeviceKey, Vec<Delivery>>,
    /// Every known device per user, for wildcard addressing
    devices: HashMap<UserId, HashSet<DeviceId>>,
    /// Devices whose deliveries are parked even while connected
    held: HashSet<DeviceKey>,
    sent: Vec<SentMessage>,
    fail_sends: usize,
    no_channel: HashSet<DeviceKey>,
}

impl NetworkState {
    fn route(&mut self, device: DeviceKey, delivery: Delivery) {
        if self.held.contains(&device) {
            self.parked.entry(device).or_default().push(delivery);
            return;
        }
        match self.inboxes.get(&device) {
            Some(inbox) if inbox.send(delivery.clone()).is_ok() => {},
            _ => self.parked.entry(device).or_default().push(delivery),
        }
    }

    /// Expand a wildcard address to the user's devices, minus the sender.
    fn expand(&self, device: &DeviceKey, from: &DeviceKey) -> Vec<DeviceKey> {
        if device.device_id != DeviceId::wildcard() {
            return vec![device.clone()];
        }
        let mut devices: Vec<_> = self
            .devices
            .get(&device.user_id)
            .into_iter()
            .flatten()
            .map(|d| DeviceKey { user_id: device.user_id.clone(), device_id: d.clone() })
            .filter(|d| d != from)
            .collect();
        devices.sort();
        devices
    }
}

/// Shared routing table. Clones route through the same network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("SimNetwork mutex poisoned")
    }

    /// Messenger sending as `identity`. Registers the device for wildcard
    /// delivery.
    pub fn messenger(&self, identity: &DeviceIdentity) -> SimMessenger {
        self.lock()
            .devices
            .entry(identity.user_id.clone())
            .or_default()
            .insert(identity.device_id.clone());
        SimMessenger { network: self.clone(), identity: identity.clone() }
    }

    /// Open `device`'s inbox. Messages parked for it are delivered first.
    pub fn connect(&self, device: &DeviceKey) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.inboxes.insert(device.clone(), tx);
        if !state.held.contains(device) {
            let parked = state.parked.remove(device).unwrap_or_default();
            for delivery in parked {
                state.route(device.clone(), delivery);
            }
        }
        rx
    }

    /// Park deliveries to `device` until [`Self::release`].
    pub fn hold(&self, device: &DeviceKey) {
        self.lock().held.insert(device.clone());
    }

    /// Deliver everything parked for `device` and stop holding it.
    pub fn release(&self, device: &DeviceKey) {
        let mut state = self.lock();
        state.held.remove(device);
        let parked = state.parked.remove(device).unwrap_or_default();
        for delivery in parked {
            state.route(device.clone(), delivery);
        }
    }

    /// Fail the next `count` sends.
    pub fn fail_next_sends(&self, count: usize) {
        self.lock().fail_sends = count;
    }

    /// Report no secure channel to `device`.
    pub fn refuse_channel(&self, device: DeviceKey) {
        self.lock().no_channel.insert(device);
    }

    /// Every accepted send so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Accepted sends of `event_type`.
    pub fn sent_of_type(&self, event_type: &str) -> Vec<SentMessage> {
        self.lock().sent.iter().filter(|m| m.event_type == event_type).cloned().collect()
    }
}

/// [`DeviceMessenger`] of one simulated device.
#[derive(Clone)]
pub struct SimMessenger {
    network: SimNetwork,
    identity: DeviceIdentity,
}

#[async_trait]
impl DeviceMessenger for SimMessenger {
    async fn send_to_device(
        &self,
        event_type: &str,
        messages: ToDeviceMessages,
    ) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::SendFailed("injected failure".to_string()));
        }

        let from = self.identity.device_key();
        let mut to = Vec::new();
        for (device, payload) in messages.iter() {
            for target in state.expand(&device, &from) {
                let delivery = Delivery {
                    sender: self.identity.user_id.clone(),
                    sender_key: self.identity.curve25519.clone(),
                    sender_ed25519: self.identity.ed25519.clone(),
                    event_type: event_type.to_string(),
                    content: payload.to_vec(),
                };
                state.route(target.clone(), delivery);
                to.push(target);
            }
        }

        state.sent.push(SentMessage { from, event_type: event_type.to_string(), to });
        Ok(())
    }

    async fn has_secure_channel(&self, device: &DeviceKey) -> Result<bool, TransportError> {
        Ok(!self.network.lock().no_channel.contains(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_identity as identity;

    #[tokio::test]
    async fn wildcard_skips_sender() {
        let network = SimNetwork::new();
        let phone = identity("@alice:x", "PHONE");
        let laptop = identity("@alice:x", "LAPTOP");
        let messenger = network.messenger(&phone);
        network.messenger(&laptop);
        let mut laptop_inbox = network.connect(&laptop.device_key());
        let mut phone_inbox = network.connect(&phone.device_key());

        let mut messages = ToDeviceMessages::new();
        messages.insert(
            &DeviceKey { user_id: UserId::from("@alice:x"), device_id: DeviceId::wildcard() },
            b"hi".to_vec(),
        );
        messenger.send_to_device("room_key_request", messages).await.unwrap();

        let delivery = laptop_inbox.try_recv().unwrap();
        assert_eq!(delivery.sender_key, phone.curve25519);
        assert!(phone_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn parked_until_connect() {
        let network = SimNetwork::new();
        let alice = identity("@alice:x", "A");
        let bob = identity("@bob:x", "B");
        let messenger = network.messenger(&alice);

        let mut messages = ToDeviceMessages::new();
        messages.insert(&bob.device_key(), b"key".to_vec());
        messenger.send_to_device("room_key", messages).await.unwrap();

        let mut inbox = network.connect(&bob.device_key());
        assert_eq!(inbox.try_recv().unwrap().content, b"key");
        assert_eq!(network.sent_of_type("room_key").len(), 1);
    }

    #[tokio::test]
    async fn held_until_release() {
        let network = SimNetwork::new();
        let alice = identity("@alice:x", "A");
        let bob = identity("@bob:x", "B");
        let messenger = network.messenger(&alice);
        let mut inbox = network.connect(&bob.device_key());
        network.hold(&bob.device_key());

        let mut messages = ToDeviceMessages::new();
        messages.insert(&bob.device_key(), b"key".to_vec());
        messenger.send_to_device("room_key", messages).await.unwrap();
        assert!(inbox.try_recv().is_err());

        network.release(&bob.device_key());
        assert_eq!(inbox.try_recv().unwrap().content, b"key");
    }

    #[tokio::test]
    async fn injected_failure_sends_nothing() {
        let network = SimNetwork::new();
        let alice = identity("@alice:x", "A");
        let bob = identity("@bob:x", "B");
        let messenger = network.messenger(&alice);
        network.fail_next_sends(1);

        let mut messages = ToDeviceMessages::new();
        messages.insert(&bob.device_key(), b"key".to_vec());
        assert!(messenger.send_to_device("room_key", messages).await.is_err());
        assert!(network.sent().is_empty());
    }
}
