//! Identity of the local device.

use roomcrypt_proto::{Curve25519Key, DeviceId, DeviceKey, Ed25519Key, UserId};

/// The device this layer runs on.
///
/// The curve key identifies us as a session originator; the ed25519 key is
/// what we claim in key announcements and forwarded keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Our user
    pub user_id: UserId,
    /// Our device
    pub device_id: DeviceId,
    /// Our identity key
    pub curve25519: Curve25519Key,
    /// Our signing key
    pub ed25519: Ed25519Key,
}

impl DeviceIdentity {
    /// Create an identity.
    pub fn new(
        user_id: impl Into<UserId>,
        device_id: impl Into<DeviceId>,
        curve25519: impl Into<Curve25519Key>,
        ed25519: impl Into<Ed25519Key>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            curve25519: curve25519.into(),
            ed25519: ed25519.into(),
        }
    }

    /// Our `(user, device)` pair.
    pub fn device_key(&self) -> DeviceKey {
        DeviceKey { user_id: self.user_id.clone(), device_id: self.device_id.clone() }
    }

    /// True if `device` is this device.
    pub fn is_self(&self, device: &DeviceKey) -> bool {
        device.user_id == self.user_id && device.device_id == self.device_id
    }
}
