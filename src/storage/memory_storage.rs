use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{KeyValueStage, PARTITIONS, PartitionName, WriteSet, apply_write_set};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Default)]
struct Inner {
    partitions: HashMap<PartitionName, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            partitions: PARTITIONS
                .iter()
                .map(|name| (*name, BTreeMap::new()))
                .collect(),
        }
    }

    fn partition(&self, name: &str) -> Result<&BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        self.partitions
            .get(name)
            .ok_or_else(|| StorageError::UnknownPartition(name.to_string()))
    }

    fn partition_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        self.partitions
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownPartition(name.to_string()))
    }
}

impl KeyValueStage for Inner {
    fn get(&self, partition: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.partition(partition)?.get(key).cloned())
    }

    fn put(
        &mut self,
        partition: PartitionName,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.partition_mut(partition)?.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, partition: PartitionName, key: Vec<u8>) -> Result<(), StorageError> {
        self.partition_mut(partition)?.remove(&key);
        Ok(())
    }
}

/// In-memory ledger storage, thread safe.
///
/// A write set is applied to a copy of the current state which replaces the
/// live state only once every statement succeeded.
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // If a previous panic occurred while holding the lock, recover the inner state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entries stored in `partition`.
    pub fn len(&self, partition: PartitionName) -> Result<usize, StorageError> {
        Ok(self.lock_inner().partition(partition)?.len())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, partition: PartitionName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.lock_inner().get(partition, key)
    }

    fn execute(&self, writes: WriteSet) -> Result<(), StorageError> {
        let mut inner = self.lock_inner();
        let mut staged = inner.clone();
        apply_write_set(&mut staged, writes)?;
        *inner = staged;
        Ok(())
    }
}
