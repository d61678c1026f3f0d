//! In-memory device directory with failure injection.

#![allow(clippy::disallowed_types, reason = "Synchronous directory state only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use roomcrypt_core::{DeviceDirectory, DeviceInfo, DeviceTrust, DirectoryError, ResolvedDevices};
use roomcrypt_proto::{DeviceKey, UserId};

#[derive(Default)]
struct DirectoryState {
    devices: BTreeMap<UserId, Vec<DeviceInfo>>,
    fail_next: usize,
    queries: usize,
}

/// Shared device list. Clones see the same devices.
#[derive(Clone, Default)]
pub struct SimDirectory {
    inner: Arc<Mutex<DirectoryState>>,
}

impl SimDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("SimDirectory mutex poisoned")
    }

    /// Publish a device, replacing any entry with the same key.
    pub fn add_device(&self, info: DeviceInfo) {
        let mut state = self.lock();
        let devices = state.devices.entry(info.user_id.clone()).or_default();
        devices.retain(|d| d.device_id != info.device_id);
        devices.push(info);
    }

    /// Remove a device (logout).
    pub fn remove_device(&self, device: &DeviceKey) {
        if let Some(devices) = self.lock().devices.get_mut(&device.user_id) {
            devices.retain(|d| d.device_id != device.device_id);
        }
    }

    /// Change how a device is trusted.
    pub fn set_trust(&self, device: &DeviceKey, trust: DeviceTrust) {
        if let Some(info) = self
            .lock()
            .devices
            .get_mut(&device.user_id)
            .and_then(|d| d.iter_mut().find(|d| d.device_id == device.device_id))
        {
            info.trust = trust;
        }
    }

    /// Fail the next `count` queries.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Queries answered or failed so far.
    pub fn query_count(&self) -> usize {
        self.lock().queries
    }
}

#[async_trait]
impl DeviceDirectory for SimDirectory {
    async fn resolve_devices(
        &self,
        user_ids: &[UserId],
    ) -> Result<ResolvedDevices, DirectoryError> {
        let mut state = self.lock();
        state.queries += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DirectoryError::QueryFailed("injected failure".to_string()));
        }

        let devices = user_ids
            .iter()
            .filter_map(|user| state.devices.get(user))
            .flatten()
            .cloned()
            .collect();
        Ok(ResolvedDevices { devices })
    }
}
