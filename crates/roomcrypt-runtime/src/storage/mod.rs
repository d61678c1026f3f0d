//! [`Store`](roomcrypt_core::Store) implementations.
//!
//! - [`MemoryStore`]: in-process maps, for tests and simulation
//! - [`RedbStore`]: durable, one redb table per record kind, CBOR values

mod memory;
mod redb;

pub use memory::MemoryStore;

pub use self::redb::RedbStore;
