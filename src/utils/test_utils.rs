//! Test utilities for ledger testing.

#[cfg(test)]
pub mod utils {
    use crate::core::account::Account;
    use crate::core::block::Block;
    use crate::core::blockchain::Blockchain;
    use crate::core::transaction::Transaction;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::Storage;
    use crate::storage::txpool::TxPool;
    use crate::types::address::Address;
    use crate::types::hash::Hash;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(1);

    /// Strictly increasing timestamp so otherwise identical transactions get
    /// distinct ids.
    pub fn next_timestamp() -> u64 {
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    pub fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    pub fn transfer(from: u8, to: u8, amount: u64) -> Transaction {
        Transaction::transfer(addr(from), addr(to), amount, 0, next_timestamp())
    }

    /// In-memory chain whose accounts start with the given confirmed balances.
    pub fn funded_chain(balances: &[(u8, u64)]) -> Blockchain<MemoryStorage, TxPool> {
        let storage = MemoryStorage::new();
        for (b, balance) in balances {
            storage
                .write_account(&Account::with_balance(addr(*b), *balance))
                .expect("in-memory write");
        }
        Blockchain::new(storage, TxPool::new(None), Default::default())
    }

    /// Block on top of the current tip of `chain`.
    pub fn next_block(
        chain: &Blockchain<MemoryStorage, TxPool>,
        transactions: Vec<Transaction>,
    ) -> Block {
        let tip = chain.storage().tip().expect("in-memory read");
        Block::new(
            tip.map_or(1, |t| t.height + 1),
            tip.map_or_else(Hash::zero, |t| t.id),
            addr(0xee),
            next_timestamp(),
            transactions,
        )
    }
}
