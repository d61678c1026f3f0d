//! Group session records.

mod inbound;
mod outbound;

pub use inbound::{InboundGroupSession, InboundSessionKey};
pub use outbound::{OutboundGroupSession, RotationReason};
