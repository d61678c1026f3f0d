//! Delivery of key shares and withheld notices.
//!
//! Both workers answer key requests; these helpers run in spawned tasks and
//! report how the attempt ended.

use roomcrypt_client::{KeyShare, ShareOutcome};
use roomcrypt_core::{DeviceMessenger, ToDeviceMessages, TransportError};
use roomcrypt_proto::{DeviceKey, RoomKeyWithheld, ToDeviceContent};

/// Send a forwarded key, but only over an established secure channel.
pub(crate) async fn share_key<M: DeviceMessenger>(messenger: &M, share: KeyShare) -> ShareOutcome {
    match messenger.has_secure_channel(&share.device).await {
        Ok(true) => {},
        Ok(false) => return ShareOutcome::NoChannel,
        Err(err) => return ShareOutcome::Failed(err),
    }

    let payload = match ToDeviceContent::ForwardedRoomKey(share.content).encode() {
        Ok(payload) => payload,
        Err(err) => return ShareOutcome::Failed(TransportError::SendFailed(err.to_string())),
    };
    let mut messages = ToDeviceMessages::new();
    messages.insert(&share.device, payload);

    match messenger.send_to_device(ToDeviceContent::FORWARDED_ROOM_KEY, messages).await {
        Ok(()) => ShareOutcome::Shared,
        Err(err) => ShareOutcome::Failed(err),
    }
}

/// Tell `device` it will not get the key.
pub(crate) async fn withhold<M: DeviceMessenger>(
    messenger: &M,
    device: &DeviceKey,
    notice: RoomKeyWithheld,
) -> ShareOutcome {
    let payload = match ToDeviceContent::Withheld(notice).encode() {
        Ok(payload) => payload,
        Err(err) => return ShareOutcome::Failed(TransportError::SendFailed(err.to_string())),
    };
    let mut messages = ToDeviceMessages::new();
    messages.insert(device, payload);

    match messenger.send_to_device(ToDeviceContent::ROOM_KEY_WITHHELD, messages).await {
        Ok(()) => ShareOutcome::Declined,
        Err(err) => ShareOutcome::Failed(err),
    }
}
