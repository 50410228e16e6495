//! Transaction pool for pending transactions awaiting block inclusion.
//!
//! The pool only stores transactions in admission order. Their speculative
//! effects live in the chain's unconfirmed overlay, which the chain updates
//! under its own lock whenever it changes the pool content.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

/// Default transaction pool capacity.
pub const TXPOOL_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("transaction {0} is already in the pool")]
    Duplicate(Hash),
    #[error("transaction pool is full ({capacity} transactions)")]
    Full { capacity: usize },
    #[error("transaction {0} is already confirmed")]
    AlreadyConfirmed(Hash),
}

/// Pool operations the block application pipeline relies on.
pub trait TransactionPool: Send + Sync {
    /// Unconfirmed transactions in the order their effects were applied.
    fn unconfirmed_set(&self) -> Vec<Transaction>;

    fn contains(&self, id: &Hash) -> bool;

    /// Appends a transaction whose effect was just applied to the overlay.
    fn insert(&self, transaction: Transaction) -> Result<(), PoolError>;

    /// Drops the given transactions, returning how many were present.
    fn remove(&self, ids: &[Hash]) -> usize;

    /// Replaces the pool content with `transactions`, in order.
    ///
    /// Used after the chain re-applied them to the overlay; capacity is not
    /// enforced since every transaction was already admitted once.
    fn reapply(&self, transactions: Vec<Transaction>);
}

/// Thread-safe pool of pending transactions.
///
/// Provides O(1) duplicate detection via hash lookup; the admission order is
/// kept in a separate queue guarded by a mutex that every mutation takes.
pub struct TxPool {
    /// Maximum number of transactions the pool will accept.
    capacity: usize,
    /// Transaction ids in admission order.
    queue: Mutex<Vec<Hash>>,
    /// Maps transaction hash to its body.
    transactions: DashMap<Hash, Transaction>,
}

impl TxPool {
    /// Creates a new transaction pool with the given capacity.
    ///
    /// Uses `TXPOOL_CAPACITY` if `None` is provided.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.unwrap_or(TXPOOL_CAPACITY).max(1),
            queue: Mutex::new(Vec::new()),
            transactions: DashMap::new(),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<Hash>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }
}

impl TransactionPool for TxPool {
    fn unconfirmed_set(&self) -> Vec<Transaction> {
        let queue = self.lock_queue();
        queue
            .iter()
            .filter_map(|id| self.transactions.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    fn contains(&self, id: &Hash) -> bool {
        self.transactions.contains_key(id)
    }

    fn insert(&self, transaction: Transaction) -> Result<(), PoolError> {
        let mut queue = self.lock_queue();
        let id = transaction.id();
        if self.transactions.contains_key(&id) {
            return Err(PoolError::Duplicate(id));
        }
        if queue.len() >= self.capacity {
            warn!(transaction = %id, capacity = self.capacity, "transaction pool is full");
            return Err(PoolError::Full {
                capacity: self.capacity,
            });
        }
        self.transactions.insert(id, transaction);
        queue.push(id);
        Ok(())
    }

    fn remove(&self, ids: &[Hash]) -> usize {
        let mut queue = self.lock_queue();
        let removed: HashSet<Hash> = ids
            .iter()
            .filter(|id| self.transactions.remove(id).is_some())
            .copied()
            .collect();
        queue.retain(|id| !removed.contains(id));
        removed.len()
    }

    fn reapply(&self, transactions: Vec<Transaction>) {
        let mut queue = self.lock_queue();
        queue.clear();
        self.transactions.clear();
        for tx in transactions {
            let id = tx.id();
            if self.transactions.insert(id, tx).is_none() {
                queue.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::Address;

    fn tx(n: u64) -> Transaction {
        Transaction::transfer(Address([1; 20]), Address([2; 20]), n, 0, n)
    }

    #[test]
    fn keeps_admission_order() {
        let pool = TxPool::new(None);
        for n in [3, 1, 2] {
            pool.insert(tx(n)).unwrap();
        }
        let amounts: Vec<_> = pool.unconfirmed_set().iter().map(Transaction::amount).collect();
        assert_eq!(amounts, vec![3, 1, 2]);
    }

    #[test]
    fn rejects_duplicates_and_overflow() {
        let pool = TxPool::new(Some(1));
        pool.insert(tx(1)).unwrap();
        assert_eq!(pool.insert(tx(1)), Err(PoolError::Duplicate(tx(1).id())));
        assert_eq!(pool.insert(tx(2)), Err(PoolError::Full { capacity: 1 }));
    }

    #[test]
    fn remove_reports_present_only() {
        let pool = TxPool::new(None);
        pool.insert(tx(1)).unwrap();
        pool.insert(tx(2)).unwrap();
        assert_eq!(pool.remove(&[tx(1).id(), tx(9).id()]), 1);
        assert!(!pool.contains(&tx(1).id()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn reapply_replaces_content_beyond_capacity() {
        let pool = TxPool::new(Some(1));
        pool.insert(tx(1)).unwrap();
        pool.reapply(vec![tx(5), tx(6), tx(5)]);
        let ids: Vec<_> = pool.unconfirmed_set().iter().map(Transaction::id).collect();
        assert_eq!(ids, vec![tx(5).id(), tx(6).id()]);
        assert!(!pool.contains(&tx(1).id()));
    }
}
