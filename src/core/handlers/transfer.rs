use super::{EffectError, EffectHandler, expect_kind};
use crate::core::ledger::LedgerView;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::storage::repos::PayloadRepository;
use crate::storage::repos::transfers::{TransferRepository, check_data};

/// Moves `amount` from sender to recipient and burns the fee.
pub struct TransferHandler {
    repository: TransferRepository,
}

impl TransferHandler {
    pub fn new() -> Self {
        Self {
            repository: TransferRepository::new(),
        }
    }
}

impl Default for TransferHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectHandler for TransferHandler {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Transfer
    }

    fn apply_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::Transfer)?;
        if let TransactionAsset::Transfer { data: Some(data) } = tx.asset() {
            check_data(data)?;
        }
        let recipient = tx.recipient().ok_or(EffectError::MissingRecipient(tx.id()))?;
        let total = tx.total_spend().ok_or(EffectError::AmountOverflow(tx.id()))?;

        let mut sender = view.account(&tx.sender())?;
        sender.debit(total)?;
        view.put(sender)?;

        // Read after the debit so a self-transfer sees it
        let mut receiver = view.account(&recipient)?;
        receiver.credit(tx.amount())?;
        view.put(receiver)
    }

    fn undo_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::Transfer)?;
        let recipient = tx.recipient().ok_or(EffectError::MissingRecipient(tx.id()))?;
        let total = tx.total_spend().ok_or(EffectError::AmountOverflow(tx.id()))?;

        let mut receiver = view.account(&recipient)?;
        receiver.debit(tx.amount())?;
        view.put(receiver)?;

        let mut sender = view.account(&tx.sender())?;
        sender.credit(total)?;
        view.put(sender)
    }

    fn repository(&self) -> &dyn PayloadRepository {
        &self.repository
    }
}
