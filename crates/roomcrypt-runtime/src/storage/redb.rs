//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Session records survive restarts; ratchet state does not live here.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use roomcrypt_core::{InboundGroupSession, OutboundGroupSession, StorageError, Store};
use serde::{Serialize, de::DeserializeOwned};

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table: outbound
/// Key: room id (UTF-8)
/// Value: CBOR-encoded `OutboundGroupSession`
const OUTBOUND: Table = TableDefinition::new("outbound");

/// Table: inbound
/// Key: CBOR-encoded `InboundSessionKey`
/// Value: CBOR-encoded `InboundGroupSession`
const INBOUND: Table = TableDefinition::new("inbound");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(OUTBOUND).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(INBOUND).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn load_all<T: DeserializeOwned>(
        &self,
        definition: Table,
    ) -> Result<Vec<T>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(definition).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut records = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn put(
        &self,
        definition: Table,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(definition).map_err(|e| StorageError::Io(e.to_string()))?;
            table.insert(key, value).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}

impl Store for RedbStore {
    fn load_outbound_sessions(&self) -> Result<Vec<OutboundGroupSession>, StorageError> {
        self.load_all(OUTBOUND)
    }

    fn save_outbound_session(&self, session: &OutboundGroupSession) -> Result<(), StorageError> {
        let value = encode(session)?;
        self.put(OUTBOUND, session.room_id().as_str().as_bytes(), &value)
    }

    fn load_inbound_sessions(&self) -> Result<Vec<InboundGroupSession>, StorageError> {
        self.load_all(INBOUND)
    }

    fn save_inbound_session(&self, session: &InboundGroupSession) -> Result<(), StorageError> {
        let key = encode(&session.key())?;
        let value = encode(session)?;
        self.put(INBOUND, &key, &value)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
