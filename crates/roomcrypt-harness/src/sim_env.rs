//! Deterministic environment for simulation.
//!
//! Randomness comes from a seeded ChaCha20 RNG; monotonic time is Tokio's
//! clock, which turmoil virtualizes. The wall clock starts at a fixed epoch
//! and follows virtual time, plus any manual offset a test applies to age
//! sessions without sleeping.

#![allow(clippy::disallowed_types, reason = "Synchronous RNG state only")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use roomcrypt_core::Environment;

/// Wall-clock time at which every simulation starts (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Seed used by [`SimEnv::new`].
const DEFAULT_SEED: u64 = 0x5eed;

/// Seeded, virtual-time environment.
///
/// Clones share the RNG and wall clock offset.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    started: tokio::time::Instant,
    wall_offset_ms: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment with the default seed.
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment whose random stream is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            started: tokio::time::Instant::now(),
            wall_offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the wall clock forward without touching monotonic time.
    pub fn advance_wall_clock(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.wall_offset_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        SIM_EPOCH_MS
            .saturating_add(elapsed)
            .saturating_add(self.wall_offset_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        #[allow(clippy::expect_used)]
        self.rng.lock().expect("SimEnv RNG mutex poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);

        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn clones_share_stream() {
        let env = SimEnv::with_seed(1);
        let fresh = SimEnv::with_seed(1);
        let clone = env.clone();

        let first = env.random_u64();
        let second = clone.random_u64();

        assert_eq!(first, fresh.random_u64());
        assert_ne!(first, second);
    }

    #[test]
    fn wall_clock_offset_applies() {
        let env = SimEnv::new();
        let before = env.wall_clock_millis();

        env.advance_wall_clock(Duration::from_secs(3600));

        assert!(env.wall_clock_millis() >= before + 3_600_000);
    }
}
