//! Per-kind payload repositories.
//!
//! A repository owns one storage partition and the mapping between a
//! transaction kind's domain payload and its row representation. Rows are
//! append-only and keyed by transaction id; removal on block undo is issued by
//! the chain as a `DeleteRow` statement.

pub mod delegates;
pub mod signatures;
pub mod transfers;

use crate::core::transaction::Transaction;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{BulkInsert, ColumnSet, Row, Statement, WriteSet};
use crate::types::encoding::EncodingError;
use std::sync::Arc;

/// One or many transactions handed to a repository in block order.
#[derive(Debug, Clone, Default)]
pub struct TransactionBatch<'a>(Vec<&'a Transaction>);

impl<'a> TransactionBatch<'a> {
    pub fn new(transactions: Vec<&'a Transaction>) -> Self {
        Self(transactions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Transaction> + '_ {
        self.0.iter().copied()
    }
}

impl<'a> From<&'a Transaction> for TransactionBatch<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self(vec![tx])
    }
}

impl<'a> From<&'a [Transaction]> for TransactionBatch<'a> {
    fn from(txs: &'a [Transaction]) -> Self {
        Self(txs.iter().collect())
    }
}

impl<'a> From<&'a Vec<Transaction>> for TransactionBatch<'a> {
    fn from(txs: &'a Vec<Transaction>) -> Self {
        Self(txs.iter().collect())
    }
}

impl<'a> From<Vec<&'a Transaction>> for TransactionBatch<'a> {
    fn from(txs: Vec<&'a Transaction>) -> Self {
        Self(txs)
    }
}

/// Bulk persistence of one transaction kind's payload.
pub trait PayloadRepository: Send + Sync {
    /// Destination partition and column layout, computed once and shared.
    fn columns(&self) -> &Arc<ColumnSet>;

    /// Row for `tx`, or `None` when the transaction carries no payload to store.
    fn project(&self, tx: &Transaction) -> Result<Option<Row>, EncodingError>;

    /// Adds one bulk insert covering every payload row of `txs` to `writes`.
    ///
    /// A batch without payload rows adds nothing.
    fn save_into(&self, txs: TransactionBatch<'_>, writes: &mut WriteSet) -> Result<(), StorageError> {
        let rows = txs
            .iter()
            .filter_map(|tx| self.project(tx).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(());
        }
        writes.push(Statement::Insert(BulkInsert::new(
            Arc::clone(self.columns()),
            rows,
        )?));
        Ok(())
    }

    /// Persists the payload rows of one or many transactions as a single statement.
    fn save<'a>(
        &self,
        txs: impl Into<TransactionBatch<'a>>,
        storage: &dyn Storage,
    ) -> Result<(), StorageError>
    where
        Self: Sized,
    {
        let mut writes = WriteSet::new();
        self.save_into(txs.into(), &mut writes)?;
        if writes.is_empty() {
            return Ok(());
        }
        storage.execute(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::Address;

    #[test]
    fn batch_normalizes_single_and_many() {
        let a = Transaction::transfer(Address([1; 20]), Address([2; 20]), 1, 0, 0);
        let b = Transaction::transfer(Address([1; 20]), Address([2; 20]), 2, 0, 0);
        assert_eq!(TransactionBatch::from(&a).len(), 1);

        let txs = vec![a.clone(), b.clone()];
        let batch = TransactionBatch::from(txs.as_slice());
        let ids: Vec<_> = batch.iter().map(Transaction::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }
}
