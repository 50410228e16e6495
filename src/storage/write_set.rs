//! Atomic write sets and the statements they are made of.
//!
//! Block application composes every mutation of the save step (accounts, the
//! block record, its transactions, payload rows) into one [`WriteSet`]. A
//! backend executes a write set all-or-nothing: statements are applied to a
//! [`KeyValueStage`] that only reaches durable storage once every statement
//! succeeded.

use crate::core::account::Account;
use crate::core::block::Header;
use crate::core::transaction::Transaction;
use crate::storage::storage_trait::{ChainTip, StorageError, TransactionRecord, decode};
use crate::types::hash::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use std::sync::Arc;

/// Name of a storage partition (column family).
pub type PartitionName = &'static str;

/// Partition holding confirmed accounts keyed by address.
pub const ACCOUNTS: &str = "accounts";
/// Partition holding block headers keyed by block id.
pub const BLOCKS: &str = "blocks";
/// Partition holding transaction records keyed by transaction id.
pub const TRANSACTIONS: &str = "transactions";
/// Partition holding chain metadata (tip).
pub const META: &str = "meta";
/// Payload partition of second-signature registrations.
pub const SIGNATURES: &str = "signatures";
/// Payload partition of delegate registrations.
pub const DELEGATES: &str = "delegates";
/// Payload partition of transfer reference data.
pub const TRANSFERS: &str = "transfers";

/// Every partition a backend must provide.
pub const PARTITIONS: [PartitionName; 7] = [
    ACCOUNTS,
    BLOCKS,
    TRANSACTIONS,
    META,
    SIGNATURES,
    DELEGATES,
    TRANSFERS,
];

/// Metadata keys stored in the [`META`] partition.
pub mod meta_keys {
    /// Id and height of the current chain tip.
    pub const TIP: &[u8] = b"tip";
}

/// One cell of a payload row in its storage representation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ColumnValue {
    Id(Hash),
    Bytes(Vec<u8>),
    Text(String),
}

/// Destination and column layout of a bulk insert.
///
/// The first column is always the transaction id and doubles as the row key.
#[derive(Debug, PartialEq, Eq)]
pub struct ColumnSet {
    table: PartitionName,
    columns: Vec<&'static str>,
}

impl ColumnSet {
    pub fn new(table: PartitionName, columns: &[&'static str]) -> Self {
        Self {
            table,
            columns: columns.to_vec(),
        }
    }

    pub fn table(&self) -> PartitionName {
        self.table
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }
}

/// A payload row, one value per column of its [`ColumnSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(pub Vec<ColumnValue>);

/// Many rows inserted into one partition by a single statement.
#[derive(Debug)]
pub struct BulkInsert {
    columns: Arc<ColumnSet>,
    rows: Vec<Row>,
}

impl BulkInsert {
    /// Builds an insert, checking every row against the column set.
    pub fn new(columns: Arc<ColumnSet>, rows: Vec<Row>) -> Result<Self, StorageError> {
        for row in &rows {
            if row.0.len() != columns.columns().len() {
                return Err(StorageError::MalformedStatement(format!(
                    "row for `{}` has {} values, expected {}",
                    columns.table(),
                    row.0.len(),
                    columns.columns().len()
                )));
            }
            if !matches!(row.0.first(), Some(ColumnValue::Id(_))) {
                return Err(StorageError::MalformedStatement(format!(
                    "row for `{}` must start with the transaction id",
                    columns.table()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn table(&self) -> PartitionName {
        self.columns.table()
    }

    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

fn row_key(row: &Row) -> Option<Hash> {
    match row.0.first() {
        Some(ColumnValue::Id(id)) => Some(*id),
        _ => None,
    }
}

/// A single mutation inside a [`WriteSet`].
#[derive(Debug)]
pub enum Statement {
    /// Writes or overwrites a confirmed account.
    PutAccount(Account),
    /// Appends a block header; the block must extend the current tip.
    PutBlock { id: Hash, header: Header },
    /// Stores a transaction body under the block that confirmed it.
    PutTransaction {
        block_id: Hash,
        transaction: Transaction,
    },
    /// Append-only payload insert; fails if any row key already exists.
    Insert(BulkInsert),
    /// Removes a payload row keyed by transaction id.
    DeleteRow {
        partition: PartitionName,
        key: Hash,
    },
    DeleteTransaction(Hash),
    /// Removes the tip block and moves the tip back to its parent.
    DeleteBlock(Hash),
}

/// Ordered statements executed as one atomic unit.
#[derive(Debug, Default)]
pub struct WriteSet {
    statements: Vec<Statement>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Number of payload rows across all inserts.
    pub fn payload_rows(&self) -> usize {
        self.statements
            .iter()
            .map(|s| match s {
                Statement::Insert(insert) => insert.rows().len(),
                _ => 0,
            })
            .sum()
    }
}

impl Extend<Statement> for WriteSet {
    fn extend<I: IntoIterator<Item = Statement>>(&mut self, iter: I) {
        self.statements.extend(iter);
    }
}

impl IntoIterator for WriteSet {
    type Item = Statement;
    type IntoIter = std::vec::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

/// Read-your-writes staging area a backend exposes while executing a write set.
pub trait KeyValueStage {
    fn get(&self, partition: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&mut self, partition: PartitionName, key: Vec<u8>, value: Vec<u8>)
    -> Result<(), StorageError>;
    fn delete(&mut self, partition: PartitionName, key: Vec<u8>) -> Result<(), StorageError>;
}

fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    borsh::to_vec(value).map_err(|e| StorageError::Backend(e.to_string()))
}

fn read_tip(stage: &dyn KeyValueStage) -> Result<Option<ChainTip>, StorageError> {
    stage
        .get(META, meta_keys::TIP)?
        .map(|bytes| decode::<ChainTip>(META, &bytes))
        .transpose()
}

/// Applies every statement of `writes` to `stage`, stopping at the first error.
///
/// The caller discards the stage on error, so a failing statement never leaves
/// the earlier ones behind.
pub fn apply_write_set(
    stage: &mut dyn KeyValueStage,
    writes: WriteSet,
) -> Result<(), StorageError> {
    for statement in writes {
        match statement {
            Statement::PutAccount(account) => {
                let value = encode(&account)?;
                stage.put(ACCOUNTS, account.address.as_slice().to_vec(), value)?;
            }
            Statement::PutBlock { id, header } => {
                let tip = read_tip(stage)?;
                let expected = tip.map(|t| t.id).unwrap_or_else(Hash::zero);
                if header.previous_block != expected {
                    return Err(StorageError::NotOnTip {
                        expected,
                        actual: header.previous_block,
                    });
                }
                if stage.get(BLOCKS, id.as_slice())?.is_some() {
                    return Err(StorageError::DuplicateBlock(id));
                }
                let tip = ChainTip {
                    id,
                    height: header.height,
                };
                stage.put(BLOCKS, id.as_slice().to_vec(), encode(&header)?)?;
                stage.put(META, meta_keys::TIP.to_vec(), encode(&tip)?)?;
            }
            Statement::PutTransaction {
                block_id,
                transaction,
            } => {
                let id = transaction.id();
                if stage.get(TRANSACTIONS, id.as_slice())?.is_some() {
                    return Err(StorageError::DuplicateTransaction(id));
                }
                let record = TransactionRecord {
                    block_id,
                    transaction,
                };
                stage.put(TRANSACTIONS, id.as_slice().to_vec(), encode(&record)?)?;
            }
            Statement::Insert(insert) => {
                let table = insert.table();
                for row in insert.rows() {
                    let key = row_key(row).ok_or_else(|| {
                        StorageError::MalformedStatement(format!("row for `{table}` has no key"))
                    })?;
                    if stage.get(table, key.as_slice())?.is_some() {
                        return Err(StorageError::DuplicateRow {
                            partition: table,
                            key,
                        });
                    }
                    stage.put(table, key.as_slice().to_vec(), encode(&row.0)?)?;
                }
            }
            Statement::DeleteRow { partition, key } => {
                stage.delete(partition, key.as_slice().to_vec())?;
            }
            Statement::DeleteTransaction(id) => {
                stage.delete(TRANSACTIONS, id.as_slice().to_vec())?;
            }
            Statement::DeleteBlock(id) => {
                let tip = read_tip(stage)?;
                if tip.map(|t| t.id) != Some(id) {
                    return Err(StorageError::NotTip {
                        tip: tip.map(|t| t.id),
                        actual: id,
                    });
                }
                let header = stage
                    .get(BLOCKS, id.as_slice())?
                    .map(|bytes| decode::<Header>(BLOCKS, &bytes))
                    .transpose()?
                    .ok_or(StorageError::MissingBlock(id))?;
                stage.delete(BLOCKS, id.as_slice().to_vec())?;
                if header.previous_block.is_zero() {
                    stage.delete(META, meta_keys::TIP.to_vec())?;
                } else {
                    let parent = ChainTip {
                        id: header.previous_block,
                        height: header.height.saturating_sub(1),
                    };
                    stage.put(META, meta_keys::TIP.to_vec(), encode(&parent)?)?;
                }
            }
        }
    }
    Ok(())
}
