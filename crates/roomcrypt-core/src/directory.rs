//! Device directory interface.

use async_trait::async_trait;
use roomcrypt_proto::{Curve25519Key, DeviceId, DeviceKey, Ed25519Key, UserId};

use crate::error::DirectoryError;

/// How the local user regards a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTrust {
    /// Seen before and acknowledged
    Known,
    /// New to the user; encrypting to it needs explicit consent
    Unknown,
    /// Never receives keys
    Blocked,
}

/// A device and its identity keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Owning user
    pub user_id: UserId,
    /// Device id
    pub device_id: DeviceId,
    /// Device's long-term curve key
    pub curve25519: Curve25519Key,
    /// Device's signing key
    pub ed25519: Ed25519Key,
    /// Local trust status
    pub trust: DeviceTrust,
}

impl DeviceInfo {
    /// `(user, device)` key.
    pub fn key(&self) -> DeviceKey {
        DeviceKey { user_id: self.user_id.clone(), device_id: self.device_id.clone() }
    }
}

/// Devices of a set of users, as of one directory query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDevices {
    /// Every device found, in directory order
    pub devices: Vec<DeviceInfo>,
}

impl ResolvedDevices {
    /// Devices flagged unknown.
    pub fn unknown(&self) -> Vec<DeviceKey> {
        self.devices
            .iter()
            .filter(|d| d.trust == DeviceTrust::Unknown)
            .map(DeviceInfo::key)
            .collect()
    }

    /// Devices that may receive keys (everything not blocked).
    pub fn shareable(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.iter().filter(|d| d.trust != DeviceTrust::Blocked)
    }
}

/// Device and key discovery.
///
/// Results are treated as a snapshot valid for a single distribution round.
#[async_trait]
pub trait DeviceDirectory: Clone + Send + Sync + 'static {
    /// Resolve users to their current devices.
    async fn resolve_devices(&self, user_ids: &[UserId]) -> Result<ResolvedDevices, DirectoryError>;
}
