//! Per-kind transaction effects.
//!
//! Every [`TransactionKind`] has exactly one [`EffectHandler`]. The handler
//! mutates accounts through a [`LedgerView`], which is either the unconfirmed
//! overlay or the confirmed write buffer, and persists the kind's payload
//! through its [`PayloadRepository`].

mod delegate;
mod second_signature;
mod transfer;

pub use delegate::DelegateHandler;
pub use second_signature::SecondSignatureHandler;
pub use transfer::TransferHandler;

use crate::core::ledger::LedgerView;
use crate::core::overlay::OverlayError;
use crate::core::transaction::{Transaction, TransactionKind};
use crate::storage::repos::{PayloadRepository, TransactionBatch};
use crate::storage::storage_trait::StorageError;
use crate::storage::write_set::{PartitionName, WriteSet};
use crate::types::address::Address;
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use thiserror::Error;

/// A transaction failed a kind-specific precondition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("account {address} holds {balance}, needs {required}")]
    InsufficientBalance {
        address: Address,
        balance: u64,
        required: u64,
    },
    #[error("balance of {0} would overflow")]
    BalanceOverflow(Address),
    #[error("amount plus fee of transaction {0} overflows")]
    AmountOverflow(Hash),
    #[error("transfer {0} has no recipient")]
    MissingRecipient(Hash),
    #[error("handler for {expected} received a {actual} transaction")]
    UnexpectedKind {
        expected: TransactionKind,
        actual: TransactionKind,
    },
    #[error("account {0} already has a second signature")]
    SecondSignatureRegistered(Address),
    #[error("account {0} has no matching second signature to remove")]
    SecondSignatureMissing(Address),
    #[error("account {address} is already registered as delegate `{username}`")]
    DelegateRegistered { address: Address, username: String },
    #[error("account {0} has no matching username to remove")]
    UsernameMissing(Address),
    #[error("invalid username `{0}`")]
    InvalidUsername(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// Effect and persistence contract implemented once per transaction kind.
///
/// `undo_*` must succeed whenever the matching `apply_*` succeeded on the same
/// state. Unconfirmed effects default to the confirmed ones; the view decides
/// which state is mutated.
pub trait EffectHandler: Send + Sync {
    fn kind(&self) -> TransactionKind;

    fn apply_confirmed(&self, tx: &Transaction, view: &mut dyn LedgerView)
    -> Result<(), EffectError>;

    fn undo_confirmed(&self, tx: &Transaction, view: &mut dyn LedgerView)
    -> Result<(), EffectError>;

    fn apply_unconfirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        self.apply_confirmed(tx, view)
    }

    fn undo_unconfirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        self.undo_confirmed(tx, view)
    }

    /// Repository owning this kind's payload rows.
    fn repository(&self) -> &dyn PayloadRepository;

    /// Partition the payload rows of this kind live in.
    fn payload_partition(&self) -> PartitionName {
        self.repository().columns().table()
    }

    /// Adds the payload rows of `txs` to `writes` as one bulk insert.
    fn persist(&self, txs: TransactionBatch<'_>, writes: &mut WriteSet) -> Result<(), StorageError> {
        self.repository().save_into(txs, writes)
    }
}

fn expect_kind(tx: &Transaction, expected: TransactionKind) -> Result<(), EffectError> {
    if tx.kind() == expected {
        Ok(())
    } else {
        Err(EffectError::UnexpectedKind {
            expected,
            actual: tx.kind(),
        })
    }
}

/// One handler per transaction kind.
pub struct Handlers {
    transfer: TransferHandler,
    second_signature: SecondSignatureHandler,
    delegate: DelegateHandler,
}

impl Handlers {
    pub fn new() -> Self {
        Self {
            transfer: TransferHandler::new(),
            second_signature: SecondSignatureHandler::new(),
            delegate: DelegateHandler::new(),
        }
    }

    pub fn for_kind(&self, kind: TransactionKind) -> &dyn EffectHandler {
        match kind {
            TransactionKind::Transfer => &self.transfer,
            TransactionKind::SecondSignature => &self.second_signature,
            TransactionKind::Delegate => &self.delegate,
        }
    }

    pub fn for_transaction(&self, tx: &Transaction) -> &dyn EffectHandler {
        self.for_kind(tx.kind())
    }
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new()
    }
}
