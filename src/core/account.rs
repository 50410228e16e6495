use crate::core::handlers::EffectError;
use crate::crypto::key_pair::PublicKeyBytes;
use crate::types::address::Address;
use borsh::{BorshDeserialize, BorshSerialize};

/// Confirmed account state as persisted in the ledger store.
///
/// Accounts that were never written read back as an empty account with a zero
/// balance, so every address has a well-defined state.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub address: Address,
    /// Spendable balance in the smallest unit.
    pub balance: u64,
    /// Key registered by a second-signature transaction.
    pub second_public_key: Option<PublicKeyBytes>,
    /// Username registered by a delegate transaction.
    pub username: Option<String>,
}

impl Account {
    /// Creates an empty account for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            second_public_key: None,
            username: None,
        }
    }

    /// Creates an account holding `balance`.
    pub fn with_balance(address: Address, balance: u64) -> Self {
        Self {
            balance,
            ..Self::new(address)
        }
    }

    /// Removes `amount` from the balance, refusing to go below zero.
    pub fn debit(&mut self, amount: u64) -> Result<(), EffectError> {
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(EffectError::InsufficientBalance {
                address: self.address,
                balance: self.balance,
                required: amount,
            })?;
        Ok(())
    }

    /// Adds `amount` to the balance.
    pub fn credit(&mut self, amount: u64) -> Result<(), EffectError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(EffectError::BalanceOverflow(self.address))?;
        Ok(())
    }

    /// Returns true if the account holds nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.balance == 0 && self.second_public_key.is_none() && self.username.is_none()
    }
}

/// Confirmed and unconfirmed state of one account side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub confirmed: Account,
    /// Confirmed state plus every outstanding pool delta.
    pub unconfirmed: Account,
}

impl AccountSnapshot {
    /// Signed difference between unconfirmed and confirmed balance.
    pub fn pending_balance(&self) -> i128 {
        i128::from(self.unconfirmed.balance) - i128::from(self.confirmed.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn new_account_is_empty() {
        let account = Account::new(addr(1));
        assert!(account.is_empty());
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn debit_rejects_overdraft_without_mutation() {
        let mut account = Account::with_balance(addr(1), 50);
        let err = account.debit(100).unwrap_err();
        assert!(matches!(
            err,
            EffectError::InsufficientBalance {
                balance: 50,
                required: 100,
                ..
            }
        ));
        assert_eq!(account.balance, 50);
    }

    #[test]
    fn credit_checks_overflow() {
        let mut account = Account::with_balance(addr(1), u64::MAX);
        assert!(matches!(
            account.credit(1),
            Err(EffectError::BalanceOverflow(_))
        ));
    }

    #[test]
    fn debit_then_credit_restores_balance() {
        let mut account = Account::with_balance(addr(2), 500);
        account.debit(120).unwrap();
        account.credit(120).unwrap();
        assert_eq!(account.balance, 500);
    }

    #[test]
    fn borsh_roundtrip() {
        let mut account = Account::with_balance(addr(3), 77);
        account.username = Some("genesis_1".into());
        let bytes = borsh::to_vec(&account).unwrap();
        let decoded = Account::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn snapshot_pending_balance_is_signed() {
        let snapshot = AccountSnapshot {
            confirmed: Account::with_balance(addr(4), 100),
            unconfirmed: Account::with_balance(addr(4), 40),
        };
        assert_eq!(snapshot.pending_balance(), -60);
    }
}
