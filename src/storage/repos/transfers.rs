use super::PayloadRepository;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{ColumnSet, ColumnValue, Row, TRANSFERS};
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use std::sync::{Arc, LazyLock};

/// Longest reference string a transfer may carry, in bytes.
pub const MAX_DATA_LENGTH: usize = 64;

/// Rejects reference data longer than [`MAX_DATA_LENGTH`].
pub fn check_data(data: &str) -> Result<(), EncodingError> {
    if data.len() > MAX_DATA_LENGTH {
        return Err(EncodingError::InvalidLength {
            field: "data",
            expected: MAX_DATA_LENGTH,
            actual: data.len(),
        });
    }
    Ok(())
}

static COLUMNS: LazyLock<Arc<ColumnSet>> =
    LazyLock::new(|| Arc::new(ColumnSet::new(TRANSFERS, &["transactionId", "data"])));

/// Persists the optional reference data of transfers. Transfers without data
/// produce no row.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    columns: Arc<ColumnSet>,
}

impl TransferRepository {
    pub fn new() -> Self {
        Self {
            columns: Arc::clone(&COLUMNS),
        }
    }

    /// Returns the reference data stored for `transaction_id`.
    pub fn find(
        &self,
        storage: &dyn Storage,
        transaction_id: &Hash,
    ) -> Result<Option<String>, StorageError> {
        let Some(row) = storage.get_row(self.columns.table(), transaction_id)? else {
            return Ok(None);
        };
        match row.as_slice() {
            [ColumnValue::Id(_), ColumnValue::Bytes(data)] => String::from_utf8(data.clone())
                .map(Some)
                .map_err(|e| {
                    EncodingError::MalformedRow {
                        partition: TRANSFERS,
                        reason: e.to_string(),
                    }
                    .into()
                }),
            _ => Err(EncodingError::MalformedRow {
                partition: TRANSFERS,
                reason: "unexpected column layout".into(),
            }
            .into()),
        }
    }
}

impl Default for TransferRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRepository for TransferRepository {
    fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    fn project(&self, tx: &Transaction) -> Result<Option<Row>, EncodingError> {
        let TransactionAsset::Transfer { data } = tx.asset() else {
            return Err(EncodingError::InvalidValue {
                field: "asset",
                reason: format!("expected {}, got {}", TransactionKind::Transfer, tx.kind()),
            });
        };
        let Some(data) = data else {
            return Ok(None);
        };
        check_data(data)?;
        Ok(Some(Row(vec![
            ColumnValue::Id(tx.id()),
            ColumnValue::Bytes(data.as_bytes().to_vec()),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::write_set::WriteSet;
    use crate::types::address::Address;

    fn with_data(data: &str) -> Transaction {
        Transaction::new(
            Address([1; 20]),
            Some(Address([2; 20])),
            1,
            0,
            0,
            TransactionAsset::Transfer {
                data: Some(data.into()),
            },
        )
    }

    #[test]
    fn plain_transfers_store_nothing() {
        let tx = Transaction::transfer(Address([1; 20]), Address([2; 20]), 1, 0, 0);
        let mut writes = WriteSet::new();
        TransferRepository::new()
            .save_into((&tx).into(), &mut writes)
            .unwrap();
        assert!(writes.is_empty());
    }

    #[test]
    fn data_roundtrips() {
        let storage = MemoryStorage::new();
        let repo = TransferRepository::new();
        let tx = with_data("invoice 42");
        repo.save(&tx, &storage).unwrap();
        assert_eq!(
            repo.find(&storage, &tx.id()).unwrap().as_deref(),
            Some("invoice 42")
        );
    }

    #[test]
    fn oversized_data_rejected() {
        let tx = with_data(&"x".repeat(MAX_DATA_LENGTH + 1));
        assert!(matches!(
            TransferRepository::new().project(&tx),
            Err(EncodingError::InvalidLength { field: "data", .. })
        ));
    }
}
