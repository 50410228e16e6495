//! Ledger storage subsystem.
//!
//! - [`storage_trait`]: Core [`Storage`](storage_trait::Storage) trait and typed readers
//! - [`write_set`]: Statements executed atomically by a backend
//! - [`memory_storage`]: Thread-safe in-memory backend
//! - [`rocksdb_storage`]: RocksDB backend, one column family per partition
//! - [`repos`]: Per-kind payload repositories
//! - [`txpool`]: Transaction pool for pending transactions
//! - [`test_storage`]: Fault-injecting backend for tests

pub mod memory_storage;
pub mod repos;
pub mod rocksdb_storage;
pub mod storage_trait;
pub mod test_storage;
pub mod txpool;
pub mod write_set;
