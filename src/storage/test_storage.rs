#[cfg(test)]
pub mod test {
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::{Storage, StorageError};
    use crate::storage::write_set::{PartitionName, WriteSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory storage whose reads or writes can be made to fail on demand.
    #[derive(Default)]
    pub struct FaultyStorage {
        inner: MemoryStorage,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FaultyStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn inner(&self) -> &MemoryStorage {
            &self.inner
        }

        pub fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    impl Storage for FaultyStorage {
        fn get(&self, partition: PartitionName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("injected read failure".into()));
            }
            self.inner.get(partition, key)
        }

        fn execute(&self, writes: WriteSet) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("injected write failure".into()));
            }
            self.inner.execute(writes)
        }
    }
}
