//! Transactions and their kind-specific payloads.

use crate::types::address::Address;
use crate::types::hash::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// Closed set of transaction kinds understood by the ledger.
///
/// Adding a kind means adding a variant here, a payload variant in
/// [`TransactionAsset`] and a handler arm in `Handlers::for_kind`; the
/// compiler points at every match that needs the new arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum TransactionKind {
    /// Native token transfer between accounts.
    Transfer,
    /// Registers a second public key on the sender account.
    SecondSignature,
    /// Registers the sender as a delegate under a username.
    Delegate,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Transfer => write!(f, "transfer"),
            TransactionKind::SecondSignature => write!(f, "second-signature"),
            TransactionKind::Delegate => write!(f, "delegate"),
        }
    }
}

/// Kind-specific payload carried in its domain (wire) representation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TransactionAsset {
    /// Optional free-form reference attached to a transfer.
    Transfer { data: Option<String> },
    /// Hex-encoded x-only public key to register.
    SecondSignature { public_key: String },
    Delegate { username: String },
}

impl TransactionAsset {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionAsset::Transfer { .. } => TransactionKind::Transfer,
            TransactionAsset::SecondSignature { .. } => TransactionKind::SecondSignature,
            TransactionAsset::Delegate { .. } => TransactionKind::Delegate,
        }
    }
}

/// An immutable ledger transaction.
///
/// The id is derived from every other field at construction, so fields are
/// only exposed through accessors.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    id: Hash,
    sender: Address,
    recipient: Option<Address>,
    amount: u64,
    fee: u64,
    /// Creation time in seconds, also keeps otherwise identical transactions apart.
    timestamp: u64,
    asset: TransactionAsset,
}

impl Transaction {
    /// Creates a transaction and derives its id.
    pub fn new(
        sender: Address,
        recipient: Option<Address>,
        amount: u64,
        fee: u64,
        timestamp: u64,
        asset: TransactionAsset,
    ) -> Self {
        let id = Self::compute_id(sender, recipient, amount, fee, timestamp, &asset);
        Self {
            id,
            sender,
            recipient,
            amount,
            fee,
            timestamp,
            asset,
        }
    }

    /// Transfer of `amount` from `sender` to `recipient`.
    pub fn transfer(
        sender: Address,
        recipient: Address,
        amount: u64,
        fee: u64,
        timestamp: u64,
    ) -> Self {
        Self::new(
            sender,
            Some(recipient),
            amount,
            fee,
            timestamp,
            TransactionAsset::Transfer { data: None },
        )
    }

    /// Registration of a hex-encoded second public key on `sender`.
    pub fn second_signature(
        sender: Address,
        public_key: impl Into<String>,
        fee: u64,
        timestamp: u64,
    ) -> Self {
        Self::new(
            sender,
            None,
            0,
            fee,
            timestamp,
            TransactionAsset::SecondSignature {
                public_key: public_key.into(),
            },
        )
    }

    /// Registration of `sender` as a delegate named `username`.
    pub fn delegate(sender: Address, username: impl Into<String>, fee: u64, timestamp: u64) -> Self {
        Self::new(
            sender,
            None,
            0,
            fee,
            timestamp,
            TransactionAsset::Delegate {
                username: username.into(),
            },
        )
    }

    fn compute_id(
        sender: Address,
        recipient: Option<Address>,
        amount: u64,
        fee: u64,
        timestamp: u64,
        asset: &TransactionAsset,
    ) -> Hash {
        let mut h = Hash::sha3();
        h.update(b"TXID");
        h.update(sender.as_slice());
        match recipient {
            Some(r) => {
                h.update(&[1]);
                h.update(r.as_slice());
            }
            None => h.update(&[0]),
        }
        h.update(&amount.to_le_bytes());
        h.update(&fee.to_le_bytes());
        h.update(&timestamp.to_le_bytes());
        // Borsh serialization into a Vec cannot fail
        h.update(&borsh::to_vec(asset).unwrap_or_default());
        h.finalize()
    }

    /// Returns true if the stored id matches the transaction content.
    pub fn has_valid_id(&self) -> bool {
        self.id
            == Self::compute_id(
                self.sender,
                self.recipient,
                self.amount,
                self.fee,
                self.timestamp,
                &self.asset,
            )
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.asset.kind()
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn recipient(&self) -> Option<Address> {
        self.recipient
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn asset(&self) -> &TransactionAsset {
        &self.asset
    }

    /// Amount plus fee, the total the sender must be able to afford.
    pub fn total_spend(&self) -> Option<u64> {
        self.amount.checked_add(self.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn id_is_deterministic() {
        let a = Transaction::transfer(addr(1), addr(2), 100, 1, 10);
        let b = Transaction::transfer(addr(1), addr(2), 100, 1, 10);
        assert_eq!(a.id(), b.id());
        assert!(a.has_valid_id());
    }

    #[test]
    fn id_changes_with_every_field() {
        let base = Transaction::transfer(addr(1), addr(2), 100, 1, 10);
        let variants = [
            Transaction::transfer(addr(3), addr(2), 100, 1, 10),
            Transaction::transfer(addr(1), addr(3), 100, 1, 10),
            Transaction::transfer(addr(1), addr(2), 101, 1, 10),
            Transaction::transfer(addr(1), addr(2), 100, 2, 10),
            Transaction::transfer(addr(1), addr(2), 100, 1, 11),
        ];
        for v in variants {
            assert_ne!(base.id(), v.id());
        }
    }

    #[test]
    fn kind_follows_asset() {
        assert_eq!(
            Transaction::transfer(addr(1), addr(2), 1, 0, 0).kind(),
            TransactionKind::Transfer
        );
        assert_eq!(
            Transaction::second_signature(addr(1), "ab", 0, 0).kind(),
            TransactionKind::SecondSignature
        );
        assert_eq!(
            Transaction::delegate(addr(1), "alice", 0, 0).kind(),
            TransactionKind::Delegate
        );
    }

    #[test]
    fn decoded_transaction_keeps_valid_id() {
        let tx = Transaction::delegate(addr(5), "bob", 25, 3);
        let bytes = borsh::to_vec(&tx).unwrap();
        let decoded = Transaction::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.has_valid_id());
    }

    #[test]
    fn total_spend_detects_overflow() {
        let tx = Transaction::transfer(addr(1), addr(2), u64::MAX, 1, 0);
        assert_eq!(tx.total_spend(), None);
    }
}
