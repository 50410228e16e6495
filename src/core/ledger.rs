//! Account views handed to effect handlers.

use crate::core::account::Account;
use crate::core::handlers::EffectError;
use crate::storage::storage_trait::Storage;
use crate::storage::write_set::Statement;
use crate::types::address::Address;
use std::collections::BTreeMap;

/// Mutable account state as seen by an effect handler.
pub trait LedgerView {
    /// Current state of `address`; unknown addresses read as empty accounts.
    fn account(&self, address: &Address) -> Result<Account, EffectError>;

    /// Replaces the state of `account.address`.
    fn put(&mut self, account: Account) -> Result<(), EffectError>;
}

/// Confirmed-state write buffer over the ledger store.
///
/// Reads fall through to storage for addresses not yet written. Nothing is
/// persisted until the buffered accounts are turned into statements and
/// executed as part of a write set, so dropping the buffer discards every
/// effect applied to it.
pub struct PendingLedger<'a> {
    storage: &'a dyn Storage,
    writes: BTreeMap<Address, Account>,
}

impl<'a> PendingLedger<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            writes: BTreeMap::new(),
        }
    }

    /// Number of accounts touched so far.
    pub fn touched(&self) -> usize {
        self.writes.len()
    }

    /// One `PutAccount` per touched account, in address order.
    pub fn statements(&self) -> Vec<Statement> {
        self.writes
            .values()
            .cloned()
            .map(Statement::PutAccount)
            .collect()
    }
}

impl LedgerView for PendingLedger<'_> {
    fn account(&self, address: &Address) -> Result<Account, EffectError> {
        if let Some(account) = self.writes.get(address) {
            return Ok(account.clone());
        }
        Ok(self.storage.account_or_default(address)?)
    }

    fn put(&mut self, account: Account) -> Result<(), EffectError> {
        self.writes.insert(account.address, account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStorage;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn reads_fall_through_until_written() {
        let storage = MemoryStorage::new();
        storage
            .write_account(&Account::with_balance(addr(1), 10))
            .unwrap();

        let mut ledger = PendingLedger::new(&storage);
        assert_eq!(ledger.account(&addr(1)).unwrap().balance, 10);

        ledger.put(Account::with_balance(addr(1), 3)).unwrap();
        assert_eq!(ledger.account(&addr(1)).unwrap().balance, 3);
        assert_eq!(storage.read_account(&addr(1)).unwrap().unwrap().balance, 10);
    }

    #[test]
    fn statements_cover_every_touched_account() {
        let storage = MemoryStorage::new();
        let mut ledger = PendingLedger::new(&storage);
        ledger.put(Account::with_balance(addr(2), 1)).unwrap();
        ledger.put(Account::with_balance(addr(1), 1)).unwrap();
        ledger.put(Account::with_balance(addr(2), 5)).unwrap();
        assert_eq!(ledger.touched(), 2);

        let statements = ledger.statements();
        assert_eq!(statements.len(), 2);
        assert!(matches!(
            &statements[1],
            Statement::PutAccount(account) if account.balance == 5
        ));
    }
}
