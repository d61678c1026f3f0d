//! Durable session storage interface.

use crate::{
    error::StorageError,
    session::{InboundGroupSession, OutboundGroupSession},
};

/// Storage abstraction for session records.
///
/// Must be Clone (shared by both workers), Send + Sync (thread-safe), and
/// synchronous (no async methods). Implementations typically share internal
/// state via Arc, so clones access the same underlying storage.
///
/// Only load-at-startup and save-on-change are required.
pub trait Store: Clone + Send + Sync + 'static {
    /// Every persisted outbound session (at most one per room).
    fn load_outbound_sessions(&self) -> Result<Vec<OutboundGroupSession>, StorageError>;

    /// Persist the current outbound session of its room.
    ///
    /// Overwrites any previous session for the same room.
    fn save_outbound_session(&self, session: &OutboundGroupSession) -> Result<(), StorageError>;

    /// Every persisted inbound session.
    fn load_inbound_sessions(&self) -> Result<Vec<InboundGroupSession>, StorageError>;

    /// Persist an inbound session.
    ///
    /// Overwrites any previous record with the same key.
    fn save_inbound_session(&self, session: &InboundGroupSession) -> Result<(), StorageError>;
}
