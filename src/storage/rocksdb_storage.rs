//! RocksDB-backed ledger storage.
//!
//! Every partition maps to a column family of the same name. A write set is
//! first applied to an in-memory stage that reads through to the database,
//! then flushed as a single [`WriteBatch`], so a failing statement never
//! reaches disk.

use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{KeyValueStage, PARTITIONS, PartitionName, WriteSet, apply_write_set};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

fn backend(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Column family descriptors for every ledger partition.
pub fn cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    PARTITIONS
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect()
}

fn cf<'a>(db: &'a DB, partition: &str) -> Result<&'a ColumnFamily, StorageError> {
    db.cf_handle(partition)
        .ok_or_else(|| StorageError::UnknownPartition(partition.to_string()))
}

/// Pending writes layered over the database.
///
/// `None` marks a staged deletion.
struct Stage<'a> {
    db: &'a DB,
    pending: BTreeMap<(PartitionName, Vec<u8>), Option<Vec<u8>>>,
}

impl KeyValueStage for Stage<'_> {
    fn get(&self, partition: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let staged = PARTITIONS
            .iter()
            .find(|name| **name == partition)
            .and_then(|name| self.pending.get(&(*name, key.to_vec())));
        if let Some(value) = staged {
            return Ok(value.clone());
        }
        self.db.get_cf(cf(self.db, partition)?, key).map_err(backend)
    }

    fn put(
        &mut self,
        partition: PartitionName,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), StorageError> {
        cf(self.db, partition)?;
        self.pending.insert((partition, key), Some(value));
        Ok(())
    }

    fn delete(&mut self, partition: PartitionName, key: Vec<u8>) -> Result<(), StorageError> {
        cf(self.db, partition)?;
        self.pending.insert((partition, key), None);
        Ok(())
    }
}

impl Stage<'_> {
    fn into_batch(self) -> Result<WriteBatch, StorageError> {
        let mut batch = WriteBatch::default();
        for ((partition, key), value) in self.pending {
            let handle = cf(self.db, partition)?;
            match value {
                Some(value) => batch.put_cf(handle, key, value),
                None => batch.delete_cf(handle, key),
            }
        }
        Ok(batch)
    }
}

struct Inner {
    db: Arc<DB>,
}

/// RocksDB-backed storage for ledger data.
pub struct RocksDbStorage {
    inner: Mutex<Inner>,
}

impl RocksDbStorage {
    /// Opens (or creates) a database at `path` with every ledger column family.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors()).map_err(backend)?;
        info!(path = %path.as_ref().display(), "opened rocksdb storage");
        Self::from_db(Arc::new(db))
    }

    /// Wraps an already opened database, checking that every partition exists.
    pub fn from_db(db: Arc<DB>) -> Result<Self, StorageError> {
        for partition in PARTITIONS {
            cf(&db, partition)?;
        }
        Ok(Self {
            inner: Mutex::new(Inner { db }),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // If a previous panic occurred while holding the lock, recover the inner state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for RocksDbStorage {
    fn get(&self, partition: PartitionName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let inner = self.lock_inner();
        inner
            .db
            .get_cf(cf(&inner.db, partition)?, key)
            .map_err(backend)
    }

    fn execute(&self, writes: WriteSet) -> Result<(), StorageError> {
        let inner = self.lock_inner();
        let statements = writes.len();
        let mut stage = Stage {
            db: &inner.db,
            pending: BTreeMap::new(),
        };
        apply_write_set(&mut stage, writes)?;
        let batch = stage.into_batch()?;
        inner.db.write(batch).map_err(backend)?;
        debug!(statements, "write set committed");
        Ok(())
    }
}
