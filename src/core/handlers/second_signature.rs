use super::{EffectError, EffectHandler, expect_kind};
use crate::core::ledger::LedgerView;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::crypto::key_pair::PublicKeyBytes;
use crate::storage::repos::PayloadRepository;
use crate::storage::repos::signatures::SignatureRepository;

/// Registers a second public key on the sender account.
pub struct SecondSignatureHandler {
    repository: SignatureRepository,
}

impl SecondSignatureHandler {
    pub fn new() -> Self {
        Self {
            repository: SignatureRepository::new(),
        }
    }
}

impl Default for SecondSignatureHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn public_key(tx: &Transaction) -> Result<PublicKeyBytes, EffectError> {
    match tx.asset() {
        TransactionAsset::SecondSignature { public_key } => {
            Ok(PublicKeyBytes::from_hex("publicKey", public_key)?)
        }
        other => Err(EffectError::UnexpectedKind {
            expected: TransactionKind::SecondSignature,
            actual: other.kind(),
        }),
    }
}

impl EffectHandler for SecondSignatureHandler {
    fn kind(&self) -> TransactionKind {
        TransactionKind::SecondSignature
    }

    fn apply_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::SecondSignature)?;
        let key = public_key(tx)?;

        let mut sender = view.account(&tx.sender())?;
        if sender.second_public_key.is_some() {
            return Err(EffectError::SecondSignatureRegistered(sender.address));
        }
        sender.debit(tx.fee())?;
        sender.second_public_key = Some(key);
        view.put(sender)
    }

    fn undo_confirmed(
        &self,
        tx: &Transaction,
        view: &mut dyn LedgerView,
    ) -> Result<(), EffectError> {
        expect_kind(tx, TransactionKind::SecondSignature)?;
        let key = public_key(tx)?;

        let mut sender = view.account(&tx.sender())?;
        if sender.second_public_key != Some(key) {
            return Err(EffectError::SecondSignatureMissing(sender.address));
        }
        sender.second_public_key = None;
        sender.credit(tx.fee())?;
        view.put(sender)
    }

    fn repository(&self) -> &dyn PayloadRepository {
        &self.repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::Account;
    use crate::core::ledger::PendingLedger;
    use crate::crypto::key_pair::PrivateKey;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::Storage;
    use crate::types::address::Address;
    use crate::types::encoding::EncodingError;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn registers_key_once() {
        let storage = MemoryStorage::new();
        storage
            .write_account(&Account::with_balance(addr(1), 20))
            .unwrap();
        let key = PrivateKey::new().public_key();
        let handler = SecondSignatureHandler::new();
        let mut ledger = PendingLedger::new(&storage);

        let tx = Transaction::second_signature(addr(1), key.to_hex(), 5, 0);
        handler.apply_confirmed(&tx, &mut ledger).unwrap();
        let account = ledger.account(&addr(1)).unwrap();
        assert_eq!(account.second_public_key, Some(key.to_bytes()));
        assert_eq!(account.balance, 15);

        let again = Transaction::second_signature(addr(1), key.to_hex(), 5, 1);
        assert!(matches!(
            handler.apply_confirmed(&again, &mut ledger),
            Err(EffectError::SecondSignatureRegistered(_))
        ));

        handler.undo_confirmed(&tx, &mut ledger).unwrap();
        assert_eq!(ledger.account(&addr(1)).unwrap(), Account::with_balance(addr(1), 20));
    }

    #[test]
    fn malformed_key_is_an_encoding_error() {
        let storage = MemoryStorage::new();
        let mut ledger = PendingLedger::new(&storage);
        let tx = Transaction::second_signature(addr(1), "not-hex", 0, 0);
        assert!(matches!(
            SecondSignatureHandler::new().apply_confirmed(&tx, &mut ledger),
            Err(EffectError::Encoding(EncodingError::InvalidHex { .. }))
        ));
    }

    #[test]
    fn undo_without_registration_fails() {
        let storage = MemoryStorage::new();
        let mut ledger = PendingLedger::new(&storage);
        let key = PrivateKey::new().public_key();
        let tx = Transaction::second_signature(addr(1), key.to_hex(), 0, 0);
        assert!(matches!(
            SecondSignatureHandler::new().undo_confirmed(&tx, &mut ledger),
            Err(EffectError::SecondSignatureMissing(_))
        ));
    }
}
