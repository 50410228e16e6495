use super::PayloadRepository;
use crate::core::transaction::{Transaction, TransactionAsset, TransactionKind};
use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::write_set::{ColumnSet, ColumnValue, DELEGATES, Row};
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use std::sync::{Arc, LazyLock};

static COLUMNS: LazyLock<Arc<ColumnSet>> =
    LazyLock::new(|| Arc::new(ColumnSet::new(DELEGATES, &["transactionId", "username"])));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRecord {
    pub transaction_id: Hash,
    pub username: String,
}

/// Persists delegate registrations.
#[derive(Debug, Clone)]
pub struct DelegateRepository {
    columns: Arc<ColumnSet>,
}

impl DelegateRepository {
    pub fn new() -> Self {
        Self {
            columns: Arc::clone(&COLUMNS),
        }
    }

    pub fn find(
        &self,
        storage: &dyn Storage,
        transaction_id: &Hash,
    ) -> Result<Option<DelegateRecord>, StorageError> {
        let Some(row) = storage.get_row(self.columns.table(), transaction_id)? else {
            return Ok(None);
        };
        match row.as_slice() {
            [ColumnValue::Id(id), ColumnValue::Text(username)] => Ok(Some(DelegateRecord {
                transaction_id: *id,
                username: username.clone(),
            })),
            _ => Err(EncodingError::MalformedRow {
                partition: DELEGATES,
                reason: "unexpected column layout".into(),
            }
            .into()),
        }
    }
}

impl Default for DelegateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRepository for DelegateRepository {
    fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    fn project(&self, tx: &Transaction) -> Result<Option<Row>, EncodingError> {
        let TransactionAsset::Delegate { username } = tx.asset() else {
            return Err(EncodingError::InvalidValue {
                field: "asset",
                reason: format!("expected {}, got {}", TransactionKind::Delegate, tx.kind()),
            });
        };
        Ok(Some(Row(vec![
            ColumnValue::Id(tx.id()),
            ColumnValue::Text(username.clone()),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::types::address::Address;

    #[test]
    fn save_and_find() {
        let storage = MemoryStorage::new();
        let repo = DelegateRepository::new();
        let tx = Transaction::delegate(Address([4; 20]), "forger", 0, 0);

        repo.save(&tx, &storage).unwrap();
        assert_eq!(
            repo.find(&storage, &tx.id()).unwrap(),
            Some(DelegateRecord {
                transaction_id: tx.id(),
                username: "forger".into(),
            })
        );
        assert_eq!(repo.find(&storage, &Hash([0; 32])).unwrap(), None);
    }
}
