//! Core data model for group-session encryption.
//!
//! Everything the state machines in `roomcrypt-client` operate on, with no
//! I/O of its own: session records, the session registry, the
//! pending-decryption queue, key request tracking, the error taxonomy and the
//! interfaces of the external collaborators.
//!
//! # Collaborators
//!
//! - [`RatchetEngine`]: the group ratchet primitive (synchronous, opaque)
//! - [`DeviceDirectory`]: device discovery (async)
//! - [`DeviceMessenger`]: to-device delivery over a secure channel (async)
//! - [`Store`]: durable session records (synchronous)
//! - [`Environment`]: time and randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod directory;
pub mod engine;
pub mod env;
pub mod error;
pub mod key_request;
pub mod messenger;
pub mod pending;
pub mod registry;
pub mod session;
pub mod store;

pub use config::{DecryptionConfig, EncryptionConfig};
pub use directory::{DeviceDirectory, DeviceInfo, DeviceTrust, ResolvedDevices};
pub use engine::{DecryptedBlock, ExportedSessionKey, RatchetEngine};
pub use env::Environment;
pub use error::{
    CryptoError, CryptoErrorKind, DecryptFailure, DirectoryError, RatchetError, StorageError,
    TransportError,
};
pub use key_request::{KeyRequestTracker, KeyShareOutcome, KeyShareRequestKey, KeyShareRequestState};
pub use messenger::{DeviceMessenger, ToDeviceMessages};
pub use pending::{DrainedBucket, PendingDecryptionQueue, PendingEvent, PendingKey};
pub use registry::{InboundSessions, InstallOutcome, OutboundSessions, SessionRegistry};
pub use session::{InboundGroupSession, InboundSessionKey, OutboundGroupSession, RotationReason};
pub use store::Store;
