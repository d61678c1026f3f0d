//! Device messenger interface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use roomcrypt_proto::{DeviceId, DeviceKey, UserId};

use crate::error::TransportError;

/// Per-device payloads for a single to-device send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToDeviceMessages {
    messages: BTreeMap<UserId, BTreeMap<DeviceId, Vec<u8>>>,
}

impl ToDeviceMessages {
    /// Empty message set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address `payload` to `device`.
    pub fn insert(&mut self, device: &DeviceKey, payload: Vec<u8>) {
        self.messages
            .entry(device.user_id.clone())
            .or_default()
            .insert(device.device_id.clone(), payload);
    }

    /// Number of addressed devices.
    pub fn device_count(&self) -> usize {
        self.messages.values().map(BTreeMap::len).sum()
    }

    /// True if nothing is addressed.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Addressed devices and their payloads.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceKey, &[u8])> + '_ {
        self.messages.iter().flat_map(|(user, devices)| {
            devices.iter().map(move |(device, payload)| {
                (DeviceKey { user_id: user.clone(), device_id: device.clone() }, payload.as_slice())
            })
        })
    }
}

/// Delivery of payloads to specific devices over an encrypted
/// device-to-device channel.
///
/// Best-effort: `send_to_device` succeeds or fails as a whole; no ordering is
/// guaranteed across calls.
#[async_trait]
pub trait DeviceMessenger: Clone + Send + Sync + 'static {
    /// Send `event_type` payloads to every addressed device.
    async fn send_to_device(
        &self,
        event_type: &str,
        messages: ToDeviceMessages,
    ) -> Result<(), TransportError>;

    /// Establish (or confirm) a secure channel to `device`.
    ///
    /// `Ok(false)` means no channel can be built right now, for instance
    /// because the device has no one-time keys left.
    async fn has_secure_channel(&self, device: &DeviceKey) -> Result<bool, TransportError>;
}
