//! Blocks and the header record persisted for them.

use crate::core::transaction::Transaction;
use crate::types::address::Address;
use crate::types::hash::Hash;
use borsh::{BorshDeserialize, BorshSerialize};

/// Block metadata persisted in the `blocks` partition.
///
/// Transaction bodies live in their own partition; the header keeps their ids
/// in block order so the block can be reassembled.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    /// Block index in the chain (first block = 1, the empty chain has height 0)
    pub height: u64,
    /// Hash of the parent block, `Hash::zero()` for the first block
    pub previous_block: Hash,
    /// Address of the producer that forged the block
    pub generator: Address,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Ids of the block transactions, in application order
    pub transaction_ids: Vec<Hash>,
}

impl Header {
    fn compute_id(&self) -> Hash {
        let mut h = Hash::sha3();
        h.update(b"BLOCK_HEADER");
        // Borsh serialization into a Vec cannot fail
        h.update(&borsh::to_vec(self).unwrap_or_default());
        h.finalize()
    }
}

/// Immutable block handed to the orchestrator exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    id: Hash,
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a block whose transactions apply in the order given.
    pub fn new(
        height: u64,
        previous_block: Hash,
        generator: Address,
        timestamp: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let header = Header {
            height,
            previous_block,
            generator,
            timestamp,
            transaction_ids: transactions.iter().map(Transaction::id).collect(),
        };
        Self::from_parts(header, transactions)
    }

    /// Reassembles a block from its stored header and transaction bodies.
    pub fn from_parts(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            id: header.compute_id(),
            header,
            transactions,
        }
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn previous_block(&self) -> Hash {
        self.header.previous_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn header_lists_transactions_in_order() {
        let t1 = Transaction::transfer(addr(1), addr(2), 10, 0, 1);
        let t2 = Transaction::transfer(addr(1), addr(3), 20, 0, 2);
        let block = Block::new(1, Hash::zero(), addr(9), 5, vec![t1.clone(), t2.clone()]);
        assert_eq!(block.header.transaction_ids, vec![t1.id(), t2.id()]);
    }

    #[test]
    fn id_depends_on_transaction_order() {
        let t1 = Transaction::transfer(addr(1), addr(2), 10, 0, 1);
        let t2 = Transaction::transfer(addr(1), addr(3), 20, 0, 2);
        let a = Block::new(1, Hash::zero(), addr(9), 5, vec![t1.clone(), t2.clone()]);
        let b = Block::new(1, Hash::zero(), addr(9), 5, vec![t2, t1]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn from_parts_reproduces_id() {
        let t1 = Transaction::delegate(addr(1), "node", 0, 1);
        let block = Block::new(3, Hash([4; 32]), addr(9), 5, vec![t1]);
        let rebuilt = Block::from_parts(block.header.clone(), block.transactions.clone());
        assert_eq!(rebuilt.id(), block.id());
    }
}
