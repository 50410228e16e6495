//! Ledger storage abstraction.
//!
//! Defines the [`Storage`] trait over partitioned key-value data, the errors
//! backends report, and the typed read helpers every backend shares.

use crate::core::account::Account;
use crate::core::block::{Block, Header};
use crate::core::transaction::Transaction;
use crate::storage::write_set::{
    ACCOUNTS, BLOCKS, ColumnValue, META, PartitionName, TRANSACTIONS, Statement, WriteSet,
    meta_keys,
};
use crate::types::address::Address;
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

/// Errors that can occur while interacting with storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Block's previous hash does not match the current chain tip.
    #[error("block does not extend current tip: expected previous hash {expected}, got {actual}")]
    NotOnTip { expected: Hash, actual: Hash },
    /// Only the tip block can be removed.
    #[error("block {actual} is not the chain tip")]
    NotTip { tip: Option<Hash>, actual: Hash },
    #[error("block {0} already stored")]
    DuplicateBlock(Hash),
    #[error("transaction {0} already stored")]
    DuplicateTransaction(Hash),
    /// Payload rows are append-only.
    #[error("row {key} already exists in `{partition}`")]
    DuplicateRow { partition: PartitionName, key: Hash },
    #[error("unknown partition `{0}`")]
    UnknownPartition(String),
    #[error("malformed statement: {0}")]
    MalformedStatement(String),
    #[error("block {0} not found")]
    MissingBlock(Hash),
    #[error("transaction {0} not found")]
    MissingTransaction(Hash),
    /// Stored bytes could not be decoded.
    #[error("corrupted entry in `{partition}`: {reason}")]
    Corrupted {
        partition: PartitionName,
        reason: String,
    },
    /// A payload field could not be converted to its storage form.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// Error reported by the underlying engine.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Current chain tip as recorded in the `meta` partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainTip {
    pub id: Hash,
    pub height: u64,
}

/// Transaction body together with the block that confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionRecord {
    pub block_id: Hash,
    pub transaction: Transaction,
}

/// Decodes a stored value, mapping failures to [`StorageError::Corrupted`].
pub fn decode<T: BorshDeserialize>(partition: PartitionName, bytes: &[u8]) -> Result<T, StorageError> {
    T::try_from_slice(bytes).map_err(|e| StorageError::Corrupted {
        partition,
        reason: e.to_string(),
    })
}

/// Storage backend for ledger data.
///
/// Implementations must be thread-safe (`Send + Sync`). Reads never observe a
/// partially executed [`WriteSet`].
pub trait Storage: Send + Sync {
    /// Reads the raw value stored under `key` in `partition`.
    fn get(&self, partition: PartitionName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Executes every statement of `writes` atomically: either all of them
    /// become visible or none does.
    fn execute(&self, writes: WriteSet) -> Result<(), StorageError>;

    /// Reads the confirmed account at `address`, if one was ever written.
    fn read_account(&self, address: &Address) -> Result<Option<Account>, StorageError> {
        self.get(ACCOUNTS, address.as_slice())?
            .map(|bytes| decode(ACCOUNTS, &bytes))
            .transpose()
    }

    /// Reads the confirmed account, defaulting to an empty one.
    fn account_or_default(&self, address: &Address) -> Result<Account, StorageError> {
        Ok(self
            .read_account(address)?
            .unwrap_or_else(|| Account::new(*address)))
    }

    /// Writes a single account outside of any block.
    fn write_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut writes = WriteSet::new();
        writes.push(Statement::PutAccount(account.clone()));
        self.execute(writes)
    }

    /// Returns the current chain tip, `None` while the chain is empty.
    fn tip(&self) -> Result<Option<ChainTip>, StorageError> {
        self.get(META, meta_keys::TIP)?
            .map(|bytes| decode(META, &bytes))
            .transpose()
    }

    /// Returns the current chain height (empty chain = 0).
    fn height(&self) -> Result<u64, StorageError> {
        Ok(self.tip()?.map(|t| t.height).unwrap_or(0))
    }

    fn get_header(&self, id: &Hash) -> Result<Option<Header>, StorageError> {
        self.get(BLOCKS, id.as_slice())?
            .map(|bytes| decode(BLOCKS, &bytes))
            .transpose()
    }

    fn get_transaction(&self, id: &Hash) -> Result<Option<TransactionRecord>, StorageError> {
        self.get(TRANSACTIONS, id.as_slice())?
            .map(|bytes| decode(TRANSACTIONS, &bytes))
            .transpose()
    }

    /// Reassembles a stored block from its header and transaction records.
    fn get_block(&self, id: &Hash) -> Result<Option<Block>, StorageError> {
        let Some(header) = self.get_header(id)? else {
            return Ok(None);
        };
        let transactions = header
            .transaction_ids
            .iter()
            .map(|tx_id| {
                self.get_transaction(tx_id)?
                    .map(|record| record.transaction)
                    .ok_or(StorageError::MissingTransaction(*tx_id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Block::from_parts(header, transactions)))
    }

    /// Reads a payload row keyed by transaction id.
    fn get_row(
        &self,
        partition: PartitionName,
        key: &Hash,
    ) -> Result<Option<Vec<ColumnValue>>, StorageError> {
        self.get(partition, key.as_slice())?
            .map(|bytes| decode(partition, &bytes))
            .transpose()
    }
}
