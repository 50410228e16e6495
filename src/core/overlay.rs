//! Unconfirmed ledger overlay.
//!
//! The overlay holds, per account, the difference between unconfirmed and
//! confirmed state caused by outstanding pool transactions. Reading an account
//! through the overlay returns the confirmed account from storage with that
//! difference applied, so `unconfirmed == confirmed + outstanding deltas` holds
//! by construction.
//!
//! Each transaction's contribution (its footprint) is kept separately. A
//! footprint leaves the overlay either through [`UnconfirmedOverlay::undo`],
//! which reverts its effect, or through [`UnconfirmedOverlay::confirm`], once
//! the same effect has been committed to confirmed state.

use crate::core::account::{Account, AccountSnapshot};
use crate::core::handlers::EffectError;
use crate::core::ledger::LedgerView;
use crate::crypto::key_pair::PublicKeyBytes;
use crate::storage::storage_trait::Storage;
use crate::types::address::Address;
use crate::types::hash::Hash;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("transaction {0} is already applied to the overlay")]
    AlreadyApplied(Hash),
    #[error("transaction {0} is not in the overlay")]
    NotApplied(Hash),
    /// The undo effect is not the exact inverse of the recorded apply.
    #[error("undo of transaction {0} does not mirror its apply")]
    UnbalancedUndo(Hash),
    #[error("unconfirmed balance of {address} out of range: {balance}")]
    BalanceOutOfRange { address: Address, balance: i128 },
    /// An aggregate entry differs from the sum of its footprints.
    #[error("overlay entry for {0} differs from its outstanding deltas")]
    Unbalanced(Address),
    #[error("pool holds {pool} transactions, overlay {overlay}")]
    PoolMismatch { pool: usize, overlay: usize },
}

/// Change of an optional account attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange<T> {
    pub from: Option<T>,
    pub to: Option<T>,
}

impl<T: Clone + PartialEq> AttributeChange<T> {
    fn between(before: &Option<T>, after: &Option<T>) -> Option<Self> {
        (before != after).then(|| Self {
            from: before.clone(),
            to: after.clone(),
        })
    }

    fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

/// `first` followed by `next`; changes that cancel out collapse to `None`.
fn chain<T: Clone + PartialEq>(
    first: Option<AttributeChange<T>>,
    next: &Option<AttributeChange<T>>,
) -> Option<AttributeChange<T>> {
    match (first, next) {
        (first, None) => first,
        (None, Some(next)) => Some(next.clone()),
        (Some(first), Some(next)) => (first.from != next.to).then(|| AttributeChange {
            from: first.from,
            to: next.to.clone(),
        }),
    }
}

/// Difference between the unconfirmed and confirmed state of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountDelta {
    pub balance: i128,
    pub second_public_key: Option<AttributeChange<PublicKeyBytes>>,
    pub username: Option<AttributeChange<String>>,
}

impl AccountDelta {
    fn between(before: &Account, after: &Account) -> Self {
        Self {
            balance: i128::from(after.balance) - i128::from(before.balance),
            second_public_key: AttributeChange::between(
                &before.second_public_key,
                &after.second_public_key,
            ),
            username: AttributeChange::between(&before.username, &after.username),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.balance == 0 && self.second_public_key.is_none() && self.username.is_none()
    }

    fn inverse(&self) -> Self {
        Self {
            balance: -self.balance,
            second_public_key: self.second_public_key.as_ref().map(AttributeChange::inverse),
            username: self.username.as_ref().map(AttributeChange::inverse),
        }
    }

    fn then(self, next: &AccountDelta) -> Self {
        Self {
            balance: self.balance + next.balance,
            second_public_key: chain(self.second_public_key, &next.second_public_key),
            username: chain(self.username, &next.username),
        }
    }

    fn apply_to(&self, mut account: Account) -> Result<Account, OverlayError> {
        let balance = i128::from(account.balance) + self.balance;
        account.balance = u64::try_from(balance).map_err(|_| OverlayError::BalanceOutOfRange {
            address: account.address,
            balance,
        })?;
        if let Some(change) = &self.second_public_key {
            account.second_public_key = change.to;
        }
        if let Some(change) = &self.username {
            account.username = change.to.clone();
        }
        Ok(account)
    }
}

type Footprint = BTreeMap<Address, AccountDelta>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OverlayEntry {
    delta: AccountDelta,
    /// Number of outstanding transactions touching the account.
    outstanding: usize,
}

/// Speculative per-account deltas of outstanding pool transactions.
///
/// Not persisted: after a restart the pool replays its content into a fresh
/// overlay.
#[derive(Debug, Default)]
pub struct UnconfirmedOverlay {
    entries: HashMap<Address, OverlayEntry>,
    footprints: HashMap<Hash, Footprint>,
    /// Ids of outstanding transactions in application order.
    order: Vec<Hash>,
}

impl UnconfirmedOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding transactions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, tx_id: &Hash) -> bool {
        self.footprints.contains_key(tx_id)
    }

    /// Aggregate delta of `address`, `None` when nothing is outstanding.
    pub fn delta(&self, address: &Address) -> Option<&AccountDelta> {
        self.entries.get(address).map(|entry| &entry.delta)
    }

    /// Number of outstanding transactions touching `address`.
    pub fn outstanding(&self, address: &Address) -> usize {
        self.entries.get(address).map_or(0, |entry| entry.outstanding)
    }

    /// Unconfirmed state of `address`: confirmed state plus outstanding deltas.
    pub fn project(&self, storage: &dyn Storage, address: &Address) -> Result<Account, EffectError> {
        let confirmed = storage.account_or_default(address)?;
        match self.entries.get(address) {
            Some(entry) => Ok(entry.delta.apply_to(confirmed)?),
            None => Ok(confirmed),
        }
    }

    /// Confirmed and unconfirmed state of `address` side by side.
    pub fn account(
        &self,
        storage: &dyn Storage,
        address: &Address,
    ) -> Result<AccountSnapshot, EffectError> {
        let confirmed = storage.account_or_default(address)?;
        let unconfirmed = match self.entries.get(address) {
            Some(entry) => entry.delta.apply_to(confirmed.clone())?,
            None => confirmed.clone(),
        };
        Ok(AccountSnapshot {
            confirmed,
            unconfirmed,
        })
    }

    /// Runs `effect` against the unconfirmed state and records its footprint
    /// under `tx_id`. Nothing is recorded if `effect` fails.
    pub fn apply<F>(&mut self, storage: &dyn Storage, tx_id: Hash, effect: F) -> Result<(), EffectError>
    where
        F: FnOnce(&mut dyn LedgerView) -> Result<(), EffectError>,
    {
        if self.contains(&tx_id) {
            return Err(OverlayError::AlreadyApplied(tx_id).into());
        }
        let footprint = self.run_scoped(storage, effect)?;
        for (address, delta) in &footprint {
            let entry = self.entries.entry(*address).or_default();
            entry.delta = std::mem::take(&mut entry.delta).then(delta);
            entry.outstanding += 1;
        }
        self.footprints.insert(tx_id, footprint);
        self.order.push(tx_id);
        Ok(())
    }

    /// Runs the inverse `effect` of an outstanding transaction and drops its
    /// footprint.
    ///
    /// Fails with [`OverlayError::UnbalancedUndo`], leaving the overlay
    /// untouched, if `effect` is not the exact inverse of what was recorded.
    pub fn undo<F>(&mut self, storage: &dyn Storage, tx_id: Hash, effect: F) -> Result<(), EffectError>
    where
        F: FnOnce(&mut dyn LedgerView) -> Result<(), EffectError>,
    {
        let recorded = self
            .footprints
            .get(&tx_id)
            .ok_or(OverlayError::NotApplied(tx_id))?;
        let expected: Footprint = recorded
            .iter()
            .map(|(address, delta)| (*address, delta.inverse()))
            .collect();

        let footprint = self.run_scoped(storage, effect)?;
        if footprint != expected {
            return Err(OverlayError::UnbalancedUndo(tx_id).into());
        }
        self.remove(&tx_id);
        Ok(())
    }

    /// Drops the footprint of a transaction whose effect is now part of
    /// confirmed state.
    pub fn confirm(&mut self, tx_id: &Hash) -> Result<(), OverlayError> {
        if !self.contains(tx_id) {
            return Err(OverlayError::NotApplied(*tx_id));
        }
        self.remove(tx_id);
        Ok(())
    }

    /// Checks every aggregate entry against the footprints it is made of.
    pub fn verify(&self) -> Result<(), OverlayError> {
        if let Some(id) = self.order.iter().find(|id| !self.footprints.contains_key(id)) {
            return Err(OverlayError::NotApplied(*id));
        }
        for footprint in self.footprints.values() {
            for address in footprint.keys() {
                if !self.entries.contains_key(address) {
                    return Err(OverlayError::Unbalanced(*address));
                }
            }
        }
        for (address, entry) in &self.entries {
            if self.recompute(address).as_ref() != Some(entry) {
                return Err(OverlayError::Unbalanced(*address));
            }
        }
        Ok(())
    }

    fn run_scoped<F>(&self, storage: &dyn Storage, effect: F) -> Result<Footprint, EffectError>
    where
        F: FnOnce(&mut dyn LedgerView) -> Result<(), EffectError>,
    {
        let mut scope = OverlayScope {
            overlay: self,
            storage,
            staged: BTreeMap::new(),
        };
        let view: &mut dyn LedgerView = &mut scope;
        effect(view)?;

        let mut footprint = Footprint::new();
        for (address, after) in scope.staged {
            let before = self.project(storage, &address)?;
            let delta = AccountDelta::between(&before, &after);
            if !delta.is_empty() {
                footprint.insert(address, delta);
            }
        }
        Ok(footprint)
    }

    fn remove(&mut self, tx_id: &Hash) {
        let Some(footprint) = self.footprints.remove(tx_id) else {
            return;
        };
        self.order.retain(|id| id != tx_id);
        for address in footprint.keys() {
            match self.recompute(address) {
                Some(entry) => {
                    self.entries.insert(*address, entry);
                }
                None => {
                    self.entries.remove(address);
                }
            }
        }
    }

    /// Folds the outstanding footprints touching `address` in application order.
    fn recompute(&self, address: &Address) -> Option<OverlayEntry> {
        let mut entry = OverlayEntry::default();
        for delta in self
            .order
            .iter()
            .filter_map(|id| self.footprints.get(id)?.get(address))
        {
            entry.delta = std::mem::take(&mut entry.delta).then(delta);
            entry.outstanding += 1;
        }
        (entry.outstanding > 0).then_some(entry)
    }
}

/// Unconfirmed view used while one transaction's effect runs.
struct OverlayScope<'a> {
    overlay: &'a UnconfirmedOverlay,
    storage: &'a dyn Storage,
    staged: BTreeMap<Address, Account>,
}

impl LedgerView for OverlayScope<'_> {
    fn account(&self, address: &Address) -> Result<Account, EffectError> {
        match self.staged.get(address) {
            Some(account) => Ok(account.clone()),
            None => self.overlay.project(self.storage, address),
        }
    }

    fn put(&mut self, account: Account) -> Result<(), EffectError> {
        self.staged.insert(account.address, account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handlers::{DelegateHandler, EffectHandler, TransferHandler};
    use crate::core::transaction::Transaction;
    use crate::storage::memory_storage::MemoryStorage;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn funded(balance: u64) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .write_account(&Account::with_balance(addr(1), balance))
            .unwrap();
        storage
    }

    fn apply(
        overlay: &mut UnconfirmedOverlay,
        storage: &MemoryStorage,
        tx: &Transaction,
    ) -> Result<(), EffectError> {
        let handler = TransferHandler::new();
        overlay.apply(storage, tx.id(), |view| handler.apply_unconfirmed(tx, view))
    }

    fn undo(
        overlay: &mut UnconfirmedOverlay,
        storage: &MemoryStorage,
        tx: &Transaction,
    ) -> Result<(), EffectError> {
        let handler = TransferHandler::new();
        overlay.undo(storage, tx.id(), |view| handler.undo_unconfirmed(tx, view))
    }

    #[test]
    fn projection_is_confirmed_plus_deltas() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let tx = Transaction::transfer(addr(1), addr(2), 30, 1, 0);
        apply(&mut overlay, &storage, &tx).unwrap();

        let sender = overlay.account(&storage, &addr(1)).unwrap();
        assert_eq!(sender.confirmed.balance, 100);
        assert_eq!(sender.unconfirmed.balance, 69);
        assert_eq!(sender.pending_balance(), -31);
        assert_eq!(overlay.project(&storage, &addr(2)).unwrap().balance, 30);
        assert_eq!(overlay.outstanding(&addr(1)), 1);
        overlay.verify().unwrap();
    }

    #[test]
    fn failed_effect_records_nothing() {
        let storage = funded(10);
        let mut overlay = UnconfirmedOverlay::new();
        let tx = Transaction::transfer(addr(1), addr(2), 30, 0, 0);
        assert!(matches!(
            apply(&mut overlay, &storage, &tx),
            Err(EffectError::InsufficientBalance { .. })
        ));
        assert!(overlay.is_empty());
        assert_eq!(overlay.delta(&addr(1)), None);
    }

    #[test]
    fn speculative_spend_limits_later_transactions() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        apply(&mut overlay, &storage, &Transaction::transfer(addr(1), addr(2), 70, 0, 0)).unwrap();
        let second = Transaction::transfer(addr(1), addr(3), 70, 0, 1);
        assert!(apply(&mut overlay, &storage, &second).is_err());
    }

    #[test]
    fn undo_restores_confirmed_view() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let t1 = Transaction::transfer(addr(1), addr(2), 10, 0, 0);
        let t2 = Transaction::transfer(addr(1), addr(3), 20, 0, 1);
        apply(&mut overlay, &storage, &t1).unwrap();
        apply(&mut overlay, &storage, &t2).unwrap();

        undo(&mut overlay, &storage, &t2).unwrap();
        undo(&mut overlay, &storage, &t1).unwrap();
        assert!(overlay.is_empty());
        assert_eq!(overlay.project(&storage, &addr(1)).unwrap().balance, 100);
        assert_eq!(overlay.delta(&addr(2)), None);
    }

    #[test]
    fn mismatched_undo_is_rejected_without_change() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let tx = Transaction::transfer(addr(1), addr(2), 10, 0, 0);
        apply(&mut overlay, &storage, &tx).unwrap();

        let other = Transaction::transfer(addr(1), addr(2), 5, 0, 9);
        let handler = TransferHandler::new();
        let err = overlay
            .undo(&storage, tx.id(), |view| handler.undo_unconfirmed(&other, view))
            .unwrap_err();
        assert_eq!(err, EffectError::Overlay(OverlayError::UnbalancedUndo(tx.id())));
        assert_eq!(overlay.project(&storage, &addr(1)).unwrap().balance, 90);
    }

    #[test]
    fn apply_twice_is_rejected() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let tx = Transaction::transfer(addr(1), addr(2), 10, 0, 0);
        apply(&mut overlay, &storage, &tx).unwrap();
        assert_eq!(
            apply(&mut overlay, &storage, &tx),
            Err(EffectError::Overlay(OverlayError::AlreadyApplied(tx.id())))
        );
    }

    #[test]
    fn confirm_moves_effect_to_confirmed_state() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let t1 = Transaction::transfer(addr(1), addr(2), 10, 0, 0);
        let t2 = Transaction::transfer(addr(1), addr(3), 20, 0, 1);
        apply(&mut overlay, &storage, &t1).unwrap();
        apply(&mut overlay, &storage, &t2).unwrap();

        // t1 committed by a block
        storage
            .write_account(&Account::with_balance(addr(1), 90))
            .unwrap();
        storage
            .write_account(&Account::with_balance(addr(2), 10))
            .unwrap();
        overlay.confirm(&t1.id()).unwrap();

        assert_eq!(overlay.project(&storage, &addr(1)).unwrap().balance, 70);
        assert_eq!(overlay.project(&storage, &addr(2)).unwrap().balance, 10);
        assert_eq!(overlay.outstanding(&addr(1)), 1);
        assert_eq!(overlay.confirm(&t1.id()), Err(OverlayError::NotApplied(t1.id())));
        overlay.verify().unwrap();
    }

    #[test]
    fn attribute_changes_project_and_cancel() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let handler = DelegateHandler::new();
        let tx = Transaction::delegate(addr(1), "alice", 10, 0);

        overlay
            .apply(&storage, tx.id(), |view| handler.apply_unconfirmed(&tx, view))
            .unwrap();
        let projected = overlay.project(&storage, &addr(1)).unwrap();
        assert_eq!(projected.username.as_deref(), Some("alice"));
        assert_eq!(projected.balance, 90);

        overlay
            .undo(&storage, tx.id(), |view| handler.undo_unconfirmed(&tx, view))
            .unwrap();
        assert_eq!(overlay.project(&storage, &addr(1)).unwrap().username, None);
        assert!(overlay.is_empty());
    }

    #[test]
    fn verify_detects_tampered_entry() {
        let storage = funded(100);
        let mut overlay = UnconfirmedOverlay::new();
        let tx = Transaction::transfer(addr(1), addr(2), 10, 0, 0);
        apply(&mut overlay, &storage, &tx).unwrap();

        if let Some(entry) = overlay.entries.get_mut(&addr(2)) {
            entry.delta.balance += 1;
        }
        assert_eq!(overlay.verify(), Err(OverlayError::Unbalanced(addr(2))));
    }
}
