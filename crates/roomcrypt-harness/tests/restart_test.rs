//! Device restarts under turmoil.
//!
//! Session records survive a restart through the store; ratchet state does
//! not. A restarted sender must rotate, and a restarted receiver must get
//! its ratchets back through key requests.

use std::time::Duration;

use roomcrypt_core::DeviceTrust;
use roomcrypt_harness::{
    SimDevice, SimDirectory, SimEnv, SimNetwork, device_info, room_event, sim_identity,
};
use roomcrypt_proto::{RoomId, ToDeviceContent, UserId};
use roomcrypt_runtime::RuntimeConfig;

fn room() -> RoomId {
    RoomId::from("!restart:roomcrypt")
}

fn bob_user() -> Vec<UserId> {
    vec![UserId::from("@bob:x")]
}

struct World {
    env: SimEnv,
    network: SimNetwork,
    directory: SimDirectory,
}

impl World {
    fn new() -> Self {
        Self { env: SimEnv::new(), network: SimNetwork::new(), directory: SimDirectory::new() }
    }

    fn device(&self, user: &str, device: &str) -> SimDevice {
        let identity = sim_identity(user, device);
        self.directory.add_device(device_info(&identity, DeviceTrust::Known));
        let config = RuntimeConfig::default();
        SimDevice::start(identity, &self.env, &self.network, &self.directory, config)
            .expect("device failed to start")
    }

    fn restart(&self, device: SimDevice) -> SimDevice {
        device
            .restart(&self.env, &self.network, &self.directory, RuntimeConfig::default())
            .expect("device failed to restart")
    }
}

#[test]
fn restarted_sender_rotates() {
    let mut sim = turmoil::Builder::new().build();

    sim.client("room", async {
        let world = World::new();
        let alice = world.device("@alice:x", "A1");
        let bob = world.device("@bob:x", "B1");

        let before = alice.handle.encrypt(room(), "m", b"before".to_vec(), bob_user()).await?;
        let persisted = alice.store.outbound(&room()).expect("session persisted");
        assert_eq!(before.session_id.as_ref(), Some(persisted.session_id()));

        let alice = world.restart(alice);
        let after = alice.handle.encrypt(room(), "m", b"after".to_vec(), bob_user()).await?;
        assert_ne!(before.session_id, after.session_id);
        assert_eq!(world.network.sent_of_type(ToDeviceContent::ROOM_KEY).len(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = &alice.identity.user_id;
        let old = bob.handle.decrypt(room_event("$1", &room(), sender, before)).await?;
        let new = bob.handle.decrypt(room_event("$2", &room(), sender, after)).await?;
        assert_eq!(old.content, b"before");
        assert_eq!(new.content, b"after");
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn restarted_receiver_recovers_key_from_sender() {
    let mut sim = turmoil::Builder::new().build();

    sim.client("room", async {
        let world = World::new();
        let alice = world.device("@alice:x", "A1");
        let bob = world.device("@bob:x", "B1");

        let envelope = alice.handle.encrypt(room(), "m", b"kept".to_vec(), bob_user()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let request = room_event("$1", &room(), &alice.identity.user_id, envelope);
        assert_eq!(bob.handle.decrypt(request.clone()).await?.content, b"kept");
        assert_eq!(bob.store.inbound_count(), 1);

        let mut bob = world.restart(bob);
        let failure = bob.handle.decrypt(request).await.expect_err("ratchet was lost");
        assert!(failure.queued);

        let redecrypted = bob.next_completion(Duration::from_secs(1)).await.expect("no reshare");
        assert_eq!(redecrypted.result?.content, b"kept");
        assert_eq!(bob.store.inbound_count(), 1);
        assert!(!world.network.sent_of_type(ToDeviceContent::ROOM_KEY_REQUEST).is_empty());
        Ok(())
    });

    sim.run().expect("simulation failed");
}
