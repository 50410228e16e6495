//! Second-signature registrations.

use super::PayloadRepository;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::crypto::key_pair::PublicKeyBytes;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{ColumnSet, ColumnValue, Row, SIGNATURES};
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use std::sync::{Arc, LazyLock};

static COLUMNS: LazyLock<Arc<ColumnSet>> =
    LazyLock::new(|| Arc::new(ColumnSet::new(SIGNATURES, &["transactionId", "publicKey"])));

/// Stored payload of a second-signature registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub transaction_id: Hash,
    pub public_key: PublicKeyBytes,
}

/// Persists the registered key of second-signature transactions as raw bytes.
#[derive(Debug, Clone)]
pub struct SignatureRepository {
    columns: Arc<ColumnSet>,
}

impl SignatureRepository {
    pub fn new() -> Self {
        Self::with_columns(Arc::clone(&COLUMNS))
    }

    pub fn with_columns(columns: Arc<ColumnSet>) -> Self {
        Self { columns }
    }

    /// Reads back the registration stored for `transaction_id`.
    pub fn find(
        &self,
        storage: &dyn Storage,
        transaction_id: &Hash,
    ) -> Result<Option<SignatureRecord>, StorageError> {
        let Some(row) = storage.get_row(self.columns.table(), transaction_id)? else {
            return Ok(None);
        };
        match row.as_slice() {
            [ColumnValue::Id(id), ColumnValue::Bytes(key)] => {
                let public_key = key.as_slice().try_into().map_err(|_| {
                    EncodingError::MalformedRow {
                        partition: SIGNATURES,
                        reason: format!("public key has {} bytes", key.len()),
                    }
                })?;
                Ok(Some(SignatureRecord {
                    transaction_id: *id,
                    public_key: PublicKeyBytes(public_key),
                }))
            }
            _ => Err(EncodingError::MalformedRow {
                partition: SIGNATURES,
                reason: "unexpected column layout".into(),
            }
            .into()),
        }
    }
}

impl Default for SignatureRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRepository for SignatureRepository {
    fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    fn project(&self, tx: &Transaction) -> Result<Option<Row>, EncodingError> {
        let TransactionAsset::SecondSignature { public_key } = tx.asset() else {
            return Err(EncodingError::InvalidValue {
                field: "asset",
                reason: format!("expected {}, got {}", TransactionKind::SecondSignature, tx.kind()),
            });
        };
        let key = PublicKeyBytes::from_hex("publicKey", public_key)?;
        Ok(Some(Row(vec![
            ColumnValue::Id(tx.id()),
            ColumnValue::Bytes(key.as_slice().to_vec()),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::write_set::{Statement, WriteSet};
    use crate::types::address::Address;

    fn registration(ts: u64) -> (Transaction, PublicKeyBytes) {
        let key = PrivateKey::new().public_key();
        (
            Transaction::second_signature(Address([1; 20]), key.to_hex(), 0, ts),
            key.to_bytes(),
        )
    }

    #[test]
    fn column_set_is_shared_between_instances() {
        let a = SignatureRepository::new();
        let b = SignatureRepository::new();
        assert!(Arc::ptr_eq(a.columns(), b.columns()));
        assert_eq!(a.columns().columns(), ["transactionId", "publicKey"]);
    }

    #[test]
    fn many_transactions_make_one_statement() {
        let (t1, _) = registration(1);
        let (t2, _) = registration(2);
        let txs = vec![t1, t2];

        let mut writes = WriteSet::new();
        SignatureRepository::new()
            .save_into(txs.as_slice().into(), &mut writes)
            .unwrap();
        assert_eq!(writes.len(), 1);
        assert!(matches!(&writes.statements()[0], Statement::Insert(i) if i.rows().len() == 2));
    }

    #[test]
    fn hex_key_roundtrips_as_raw_bytes() {
        let storage = MemoryStorage::new();
        let repo = SignatureRepository::new();
        let (tx, key) = registration(1);

        repo.save(&tx, &storage).unwrap();
        let record = repo.find(&storage, &tx.id()).unwrap().unwrap();
        assert_eq!(record.transaction_id, tx.id());
        assert_eq!(record.public_key, key);
    }

    #[test]
    fn malformed_hex_propagates() {
        let tx = Transaction::second_signature(Address([1; 20]), "zz", 0, 0);
        let mut writes = WriteSet::new();
        let err = SignatureRepository::new()
            .save_into((&tx).into(), &mut writes)
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Encoding(EncodingError::InvalidHex { field: "publicKey", .. })
        ));
        assert!(writes.is_empty());
    }

    #[test]
    fn rows_are_append_only() {
        let storage = MemoryStorage::new();
        let repo = SignatureRepository::new();
        let (tx, _) = registration(1);
        repo.save(&tx, &storage).unwrap();
        assert!(matches!(
            repo.save(&tx, &storage),
            Err(StorageError::DuplicateRow { .. })
        ));
    }

    #[test]
    fn rejects_other_kinds() {
        let tx = Transaction::delegate(Address([1; 20]), "name", 0, 0);
        assert!(matches!(
            SignatureRepository::new().project(&tx),
            Err(EncodingError::InvalidValue { field: "asset", .. })
        ));
    }
}
