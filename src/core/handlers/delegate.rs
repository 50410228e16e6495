use super::{EffectError, EffectHandler, expect_kind};
use crate::core::ledger::LedgerView;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::storage::repos::PayloadRepository;
use crate::storage::repos::delegates::DelegateRepository;

/// Longest username a delegate may register.
pub const MAX_USERNAME_LENGTH: usize = 20;

/// Registers the sender as a delegate under a username.
pub struct DelegateHandler {
    repository: DelegateRepository,
}

impl DelegateHandler {
    pub fn new() -> Self {
        Self {
            repository: DelegateRepository::new(),
        }
    }
}

impl Default for DelegateHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase alphanumerics and `!@$&_.`, 1 to 20 characters.
fn validate_username(username: &str) -> Result<(), EffectError> {
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "!@$&_.".contains(c);
    if username.is_empty() || username.len() > MAX_USERNAME_LENGTH || !username.chars().all(allowed)
    {
        return Err(EffectError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

fn username(tx: &Transaction) -> Result<&str, EffectError> {
    match tx.asset() {
        TransactionAsset::Delegate { username } => Ok(username),
        other => Err(EffectError::UnexpectedKind {
            expected: TransactionKind::Delegate,
            actual: other.kind(),
        }),
    }
}

impl EffectHandler for DelegateHandler {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Delegate
    }

    fn apply_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::Delegate)?;
        let name = username(tx)?;
        validate_username(name)?;

        let mut sender = view.account(&tx.sender())?;
        if let Some(existing) = &sender.username {
            return Err(EffectError::DelegateRegistered {
                address: sender.address,
                username: existing.clone(),
            });
        }
        sender.debit(tx.fee())?;
        sender.username = Some(name.to_string());
        view.put(sender)
    }

    fn undo_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::Delegate)?;
        let name = username(tx)?;

        let mut sender = view.account(&tx.sender())?;
        if sender.username.as_deref() != Some(name) {
            return Err(EffectError::UsernameMissing(sender.address));
        }
        sender.username = None;
        sender.credit(tx.fee())?;
        view.put(sender)
    }

    fn repository(&self) -> &dyn PayloadRepository {
        &self.repository
    }
}
