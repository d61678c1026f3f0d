//! Deterministic simulation harness for roomcrypt.
//!
//! Simulated implementations of the runtime's collaborators, for
//! reproducible tests of key distribution and decryption across many
//! devices:
//!
//! - [`SimEnv`]: seeded RNG, virtual time (under turmoil)
//! - [`SimDirectory`]: device list with trust changes and query failures
//! - [`SimNetwork`]/[`SimMessenger`]: to-device routing with send failures,
//!   refused channels and wildcard addressing
//! - [`SimDevice`]: a running device wired to all of the above
//!
//! The [`scenario`] module drives whole rooms; the `roomcrypt-sim` binary
//! runs it from the command line.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
mod sim_device;
mod sim_directory;
mod sim_env;
mod sim_network;

pub use sim_device::{MAIN_TIMELINE, SimDevice, device_info, room_event, sim_identity};
pub use sim_directory::SimDirectory;
pub use sim_env::{SIM_EPOCH_MS, SimEnv};
pub use sim_network::{Delivery, SentMessage, SimMessenger, SimNetwork};
