//! Client
//!
//! Action-based state machines for group-session encryption. Both machines
//! receive events, process them through pure state machine logic, and return
//! actions for the caller to execute. No I/O happens here; directory lookups,
//! to-device sends and persistence are actions whose completions come back as
//! events.
//!
//! # Components
//!
//! - [`OutboundSessionManager`]: creates, rotates and shares outbound sessions
//!   and encrypts room events
//! - [`Decryptor`]: decrypts room events, queues those missing keys, and runs
//!   the key exchange protocol (announcements, forwarded keys, requests,
//!   withheld notices)
//! - [`OutboundEvent`]/[`OutboundAction`] and
//!   [`DecryptorEvent`]/[`DecryptorAction`]: the machines' vocabularies
//!
//! The two machines share no state. The outbound side hands new sessions to
//! the inbound side ([`OutboundAction::InstallOwnSession`]) and the inbound
//! side routes other users' key requests back
//! ([`DecryptorAction::ReshareRequested`]).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod batch;
mod decryptor;
mod error;
mod event;
mod identity;
mod key_exchange;
mod outbound;
#[cfg(test)]
mod testing;

pub use decryptor::Decryptor;
pub use error::ClientError;
pub use event::{
    DecryptRequest, DecryptedEvent, DecryptorAction, DecryptorEvent, KeyShare, LogLevel,
    OutboundAction, OutboundEvent, ShareOutcome,
};
pub use identity::DeviceIdentity;
pub use outbound::OutboundSessionManager;
