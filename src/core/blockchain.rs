//! Block application and the chain state it guards.
//!
//! [`Blockchain::apply_block`] moves the ledger from its confirmed state to the
//! state implied by a block in five strictly ordered steps:
//!
//! 1. revert the overlay effects of every pool transaction,
//! 2. apply the block transactions to the unconfirmed overlay,
//! 3. apply them to a confirmed write buffer over the ledger store,
//! 4. persist accounts, block, transactions and payload rows as one write set,
//! 5. drop consumed transactions from the pool and re-apply the survivors.
//!
//! Steps 2 to 4 are transactional as a group: any failure undoes the effects
//! already applied, in reverse order, and restores the pool's overlay effects.
//! The chain lock is held from step 1 to step 5 and by every pool admission.

use crate::config::ChainConfig;
use crate::core::account::AccountSnapshot;
use crate::core::block::Block;
use crate::core::handlers::{EffectError, Handlers};
use crate::core::ledger::PendingLedger;
use crate::core::overlay::{OverlayError, UnconfirmedOverlay};
use crate::core::transaction::{Transaction, TransactionKind};
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::repos::TransactionBatch;
use crate::storage::rocksdb_storage::RocksDbStorage;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::storage::txpool::{PoolError, TransactionPool, TxPool};
use crate::storage::write_set::{Statement, WriteSet};
use crate::types::address::Address;
use crate::types::encoding::EncodingError;
use crate::types::hash::Hash;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Errors returned by block application and pool admission.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A transaction failed a kind-specific precondition; nothing was applied.
    #[error("transaction {transaction} rejected: {source}")]
    Validation {
        transaction: Hash,
        #[source]
        source: EffectError,
    },
    #[error("block has {count} transactions, limit is {limit}")]
    BlockTooLarge { count: usize, limit: usize },
    /// Persistence or read failure; nothing was applied.
    #[error(transparent)]
    Storage(StorageError),
    /// A payload field could not be converted to its storage form; nothing was applied.
    #[error(transparent)]
    Encoding(EncodingError),
    /// The block is committed but some pool transactions no longer apply on
    /// top of it and were dropped from the pool.
    #[error("block {block} committed, {} pool transactions dropped", dropped.len())]
    Reconciliation {
        block: Hash,
        dropped: Vec<(Hash, EffectError)>,
    },
    /// The unconfirmed state could not be kept consistent; the chain halts.
    #[error("fatal ledger state during {stage}: {source}")]
    FatalState {
        stage: &'static str,
        #[source]
        source: EffectError,
    },
    #[error("block application cancelled")]
    Cancelled,
    #[error("block processing halted after a fatal error")]
    Halted,
    #[error("chain has no block to undo")]
    EmptyChain,
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ApplyError {
    /// Returns true if the ledger change was committed despite the error.
    pub fn is_committed(&self) -> bool {
        matches!(self, ApplyError::Reconciliation { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::FatalState { .. } | ApplyError::Halted)
    }
}

impl From<StorageError> for ApplyError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Encoding(e) => ApplyError::Encoding(e),
            e => ApplyError::Storage(e),
        }
    }
}

fn fatal(stage: &'static str) -> impl FnOnce(EffectError) -> ApplyError {
    move |source| ApplyError::FatalState { stage, source }
}

/// Maps a failed effect of `transaction` to the error kind the caller sees.
///
/// Read failures and malformed payloads keep their own kinds; everything
/// else is a failed precondition.
fn rejected(transaction: Hash) -> impl FnOnce(EffectError) -> ApplyError {
    move |source| match source {
        EffectError::Storage(e) => e.into(),
        EffectError::Encoding(e) => ApplyError::Encoding(e),
        source => ApplyError::Validation {
            transaction,
            source,
        },
    }
}

/// Notifications published after the ledger changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    BlockApplied {
        id: Hash,
        height: u64,
        transactions: usize,
    },
    BlockUndone {
        id: Hash,
        height: u64,
    },
}

/// Cooperative cancellation for [`Blockchain::apply_block_with_cancel`].
///
/// Observed up to the start of the save step only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State guarded by the chain lock.
#[derive(Default)]
struct ChainState {
    overlay: UnconfirmedOverlay,
    /// Set after a fatal error; no further mutation is accepted.
    halted: bool,
}

/// Block application pipeline over a ledger store and a transaction pool.
pub struct Blockchain<S: Storage, P: TransactionPool> {
    storage: S,
    pool: P,
    handlers: Handlers,
    config: ChainConfig,
    state: Mutex<ChainState>,
    events: broadcast::Sender<ChainEvent>,
}

impl Blockchain<MemoryStorage, TxPool> {
    /// Creates a chain over in-memory storage.
    pub fn in_memory(config: ChainConfig) -> Self {
        let pool = TxPool::new(Some(config.txpool_capacity));
        Self::new(MemoryStorage::new(), pool, config)
    }
}

impl Blockchain<RocksDbStorage, TxPool> {
    /// Opens a chain persisted in `config.data_dir`.
    pub fn persistent(config: ChainConfig) -> Result<Self, StorageError> {
        let dir = config
            .data_dir
            .clone()
            .ok_or_else(|| StorageError::Backend("data_dir is not configured".into()))?;
        let storage = RocksDbStorage::open(dir)?;
        let pool = TxPool::new(Some(config.txpool_capacity));
        Ok(Self::new(storage, pool, config))
    }
}

impl<S: Storage, P: TransactionPool> Blockchain<S, P> {
    /// Creates a chain over `storage` and `pool`.
    ///
    /// `pool` must be empty: its content would have no overlay effects.
    pub fn new(storage: S, pool: P, config: ChainConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            storage,
            pool,
            handlers: Handlers::new(),
            config,
            state: Mutex::new(ChainState::default()),
            events,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChainState> {
        // If a previous panic occurred while holding the lock, recover the inner state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Returns the height of the chain (empty chain = 0).
    pub fn height(&self) -> Result<u64, StorageError> {
        self.storage.height()
    }

    pub fn is_halted(&self) -> bool {
        self.lock_state().halted
    }

    /// Receives every [`ChainEvent`] published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Confirmed and unconfirmed state of `address`.
    pub fn account(&self, address: &Address) -> Result<AccountSnapshot, EffectError> {
        let state = self.lock_state();
        state.overlay.account(&self.storage, address)
    }

    /// Checks the overlay bookkeeping against the pool content.
    pub fn verify_overlay(&self) -> Result<(), EffectError> {
        let state = self.lock_state();
        state.overlay.verify()?;
        let pool_set = self.pool.unconfirmed_set();
        if let Some(tx) = pool_set.iter().find(|tx| !state.overlay.contains(&tx.id())) {
            return Err(OverlayError::NotApplied(tx.id()).into());
        }
        if pool_set.len() != state.overlay.len() {
            return Err(OverlayError::PoolMismatch {
                pool: pool_set.len(),
                overlay: state.overlay.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Applies `block` on top of the current tip.
    ///
    /// The block must already have passed structural and signature
    /// verification. When `broadcast` is true a [`ChainEvent::BlockApplied`]
    /// is published after commit.
    pub fn apply_block(&self, block: &Block, broadcast: bool) -> Result<(), ApplyError> {
        self.apply_block_with_cancel(block, broadcast, &CancelToken::new())
    }

    /// Same as [`Self::apply_block`], giving up if `cancel` fires before the
    /// save step.
    pub fn apply_block_with_cancel(
        &self,
        block: &Block,
        broadcast: bool,
        cancel: &CancelToken,
    ) -> Result<(), ApplyError> {
        let mut state = self.lock_state();
        if state.halted {
            return Err(ApplyError::Halted);
        }

        let count = block.transactions.len();
        if count > self.config.max_block_transactions {
            return Err(ApplyError::BlockTooLarge {
                count,
                limit: self.config.max_block_transactions,
            });
        }
        if cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }

        let result = self.apply_locked(&mut state, block, cancel);
        match &result {
            Ok(()) => {
                info!(
                    height = block.height(),
                    id = %block.id(),
                    transactions = count,
                    "block applied"
                );
            }
            Err(ApplyError::FatalState { stage, source }) => {
                error!(height = block.height(), id = %block.id(), stage, %source, "halting block processing");
                state.halted = true;
            }
            Err(e) if e.is_committed() => {
                warn!(height = block.height(), id = %block.id(), error = %e, "block applied with pool reconciliation errors");
            }
            Err(e) => {
                warn!(height = block.height(), id = %block.id(), error = %e, "block rejected");
            }
        }

        let committed = result.as_ref().map_or_else(ApplyError::is_committed, |_| true);
        if committed && broadcast {
            // No subscriber is not an error
            let _ = self.events.send(ChainEvent::BlockApplied {
                id: block.id(),
                height: block.height(),
                transactions: count,
            });
        }
        result
    }

    fn apply_locked(
        &self,
        state: &mut ChainState,
        block: &Block,
        cancel: &CancelToken,
    ) -> Result<(), ApplyError> {
        let pool_set = self.pool.unconfirmed_set();

        // Step 1: revert-unconfirmed
        self.revert_pool(&mut state.overlay, &pool_set)
            .map_err(fatal("revert-unconfirmed"))?;

        // Steps 2 to 4
        if let Err(e) = self.apply_and_save(&mut state.overlay, block, cancel) {
            if !e.is_fatal() {
                self.restore_pool(&mut state.overlay, &pool_set)?;
            }
            return Err(e);
        }

        // Step 5: reconcile-pool
        self.reconcile_pool(&mut state.overlay, block, pool_set)
    }

    fn apply_and_save(
        &self,
        overlay: &mut UnconfirmedOverlay,
        block: &Block,
        cancel: &CancelToken,
    ) -> Result<(), ApplyError> {
        let txs = block.transactions.as_slice();
        let mut ledger = PendingLedger::new(&self.storage);

        // Step 2: apply-unconfirmed
        for (i, tx) in txs.iter().enumerate() {
            let handler = self.handlers.for_transaction(tx);
            if let Err(source) =
                overlay.apply(&self.storage, tx.id(), |view| handler.apply_unconfirmed(tx, view))
            {
                self.rollback(overlay, &mut ledger, &txs[..i], &[])?;
                return Err(rejected(tx.id())(source));
            }
        }
        if cancel.is_cancelled() {
            self.rollback(overlay, &mut ledger, txs, &[])?;
            return Err(ApplyError::Cancelled);
        }

        // Step 3: apply-confirmed
        for (i, tx) in txs.iter().enumerate() {
            if let Err(source) = self.handlers.for_transaction(tx).apply_confirmed(tx, &mut ledger) {
                self.rollback(overlay, &mut ledger, txs, &txs[..i])?;
                return Err(rejected(tx.id())(source));
            }
        }
        if cancel.is_cancelled() {
            self.rollback(overlay, &mut ledger, txs, txs)?;
            return Err(ApplyError::Cancelled);
        }
        overlay.verify().map_err(|e| ApplyError::FatalState {
            stage: "verify-overlay",
            source: e.into(),
        })?;

        // Step 4: save-block
        let saved = self
            .block_writes(block, &ledger)
            .and_then(|writes| self.storage.execute(writes));
        if let Err(e) = saved {
            self.rollback(overlay, &mut ledger, txs, txs)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Builds the atomic write set of the save step.
    ///
    /// Payload rows are grouped into one bulk insert per transaction kind,
    /// keeping block order within each kind.
    fn block_writes(&self, block: &Block, ledger: &PendingLedger<'_>) -> Result<WriteSet, StorageError> {
        let mut by_kind: BTreeMap<TransactionKind, Vec<&Transaction>> = BTreeMap::new();
        for tx in &block.transactions {
            by_kind.entry(tx.kind()).or_default().push(tx);
        }

        let mut writes = WriteSet::new();
        writes.extend(ledger.statements());
        writes.push(Statement::PutBlock {
            id: block.id(),
            header: block.header.clone(),
        });
        for tx in &block.transactions {
            writes.push(Statement::PutTransaction {
                block_id: block.id(),
                transaction: tx.clone(),
            });
        }
        for (kind, txs) in by_kind {
            self.handlers
                .for_kind(kind)
                .persist(TransactionBatch::new(txs), &mut writes)?;
        }
        debug!(
            statements = writes.len(),
            payload_rows = writes.payload_rows(),
            "save step prepared"
        );
        Ok(writes)
    }

    /// Undoes `confirmed` on the write buffer, then `unconfirmed` on the
    /// overlay, each in reverse order.
    fn rollback(
        &self,
        overlay: &mut UnconfirmedOverlay,
        ledger: &mut PendingLedger<'_>,
        unconfirmed: &[Transaction],
        confirmed: &[Transaction],
    ) -> Result<(), ApplyError> {
        warn!(
            unconfirmed = unconfirmed.len(),
            confirmed = confirmed.len(),
            "rolling back block effects"
        );
        for tx in confirmed.iter().rev() {
            self.handlers
                .for_transaction(tx)
                .undo_confirmed(tx, ledger)
                .map_err(fatal("undo-confirmed"))?;
        }
        for tx in unconfirmed.iter().rev() {
            let handler = self.handlers.for_transaction(tx);
            overlay
                .undo(&self.storage, tx.id(), |view| handler.undo_unconfirmed(tx, view))
                .map_err(fatal("undo-unconfirmed"))?;
        }
        Ok(())
    }

    /// Reverts the overlay effects of `pool_set`, newest first.
    fn revert_pool(
        &self,
        overlay: &mut UnconfirmedOverlay,
        pool_set: &[Transaction],
    ) -> Result<(), EffectError> {
        for tx in pool_set.iter().rev() {
            let handler = self.handlers.for_transaction(tx);
            overlay.undo(&self.storage, tx.id(), |view| handler.undo_unconfirmed(tx, view))?;
        }
        Ok(())
    }

    /// Re-applies `pool_set` after a failed attempt left confirmed state as it was.
    fn restore_pool(
        &self,
        overlay: &mut UnconfirmedOverlay,
        pool_set: &[Transaction],
    ) -> Result<(), ApplyError> {
        for tx in pool_set {
            let handler = self.handlers.for_transaction(tx);
            overlay
                .apply(&self.storage, tx.id(), |view| handler.apply_unconfirmed(tx, view))
                .map_err(fatal("restore-pool"))?;
        }
        Ok(())
    }

    /// Applies `transactions` to the overlay in order and makes the pool hold
    /// exactly those that still apply. Returns the ones that were dropped.
    fn replay_pool(
        &self,
        overlay: &mut UnconfirmedOverlay,
        transactions: impl IntoIterator<Item = Transaction>,
    ) -> Vec<(Hash, EffectError)> {
        let mut survivors = Vec::new();
        let mut dropped = Vec::new();
        for tx in transactions {
            let handler = self.handlers.for_transaction(&tx);
            match overlay.apply(&self.storage, tx.id(), |view| handler.apply_unconfirmed(&tx, view)) {
                Ok(()) => survivors.push(tx),
                Err(e) => {
                    warn!(transaction = %tx.id(), error = %e, "dropping pool transaction");
                    dropped.push((tx.id(), e));
                }
            }
        }
        self.pool.reapply(survivors);
        dropped
    }

    fn reconcile_pool(
        &self,
        overlay: &mut UnconfirmedOverlay,
        block: &Block,
        pool_set: Vec<Transaction>,
    ) -> Result<(), ApplyError> {
        let consumed: Vec<Hash> = block.transactions.iter().map(Transaction::id).collect();
        for id in &consumed {
            overlay.confirm(id).map_err(|e| ApplyError::FatalState {
                stage: "confirm",
                source: e.into(),
            })?;
        }
        let removed = self.pool.remove(&consumed);
        let consumed: HashSet<Hash> = consumed.into_iter().collect();

        let survivors = pool_set
            .into_iter()
            .filter(|tx| !consumed.contains(&tx.id()));
        let dropped = self.replay_pool(overlay, survivors);
        debug!(removed, dropped = dropped.len(), "pool reconciled");

        if dropped.is_empty() {
            Ok(())
        } else {
            Err(ApplyError::Reconciliation {
                block: block.id(),
                dropped,
            })
        }
    }

    /// Speculatively applies `tx` and admits it to the pool.
    ///
    /// Takes the chain lock, so admission never interleaves with block
    /// application.
    pub fn receive_transaction(&self, tx: Transaction) -> Result<(), ApplyError> {
        let mut state = self.lock_state();
        if state.halted {
            return Err(ApplyError::Halted);
        }
        let id = tx.id();
        if self.pool.contains(&id) {
            return Err(PoolError::Duplicate(id).into());
        }
        if self.storage.get_transaction(&id)?.is_some() {
            return Err(PoolError::AlreadyConfirmed(id).into());
        }

        let handler = self.handlers.for_transaction(&tx);
        state
            .overlay
            .apply(&self.storage, id, |view| handler.apply_unconfirmed(&tx, view))
            .map_err(rejected(id))?;

        if let Err(e) = self.pool.insert(tx.clone()) {
            let undone = state
                .overlay
                .undo(&self.storage, id, |view| handler.undo_unconfirmed(&tx, view));
            if let Err(source) = undone {
                error!(transaction = %id, %source, "halting block processing");
                state.halted = true;
                return Err(ApplyError::FatalState {
                    stage: "undo-unconfirmed",
                    source,
                });
            }
            return Err(e.into());
        }
        debug!(transaction = %id, kind = %tx.kind(), "transaction admitted to pool");
        Ok(())
    }

    /// Reverts the tip block and returns it.
    ///
    /// Its transactions go back to the pool ahead of the previous pool
    /// content; any that no longer apply are dropped and reported through
    /// [`ApplyError::Reconciliation`].
    pub fn undo_last_block(&self) -> Result<Block, ApplyError> {
        let mut state = self.lock_state();
        if state.halted {
            return Err(ApplyError::Halted);
        }

        let result = self.undo_locked(&mut state);
        match &result {
            Ok(block) => info!(height = block.height(), id = %block.id(), "block undone"),
            Err(ApplyError::FatalState { stage, source }) => {
                error!(stage, %source, "halting block processing");
                state.halted = true;
            }
            Err(e) => warn!(error = %e, "block undo failed"),
        }
        result
    }

    fn undo_locked(&self, state: &mut ChainState) -> Result<Block, ApplyError> {
        let tip = self.storage.tip()?.ok_or(ApplyError::EmptyChain)?;
        let block = self
            .storage
            .get_block(&tip.id)?
            .ok_or(StorageError::MissingBlock(tip.id))?;
        let pool_set = self.pool.unconfirmed_set();

        self.revert_pool(&mut state.overlay, &pool_set)
            .map_err(fatal("revert-unconfirmed"))?;

        let reverted = self.revert_block(&block);
        if let Err(e) = reverted {
            self.restore_pool(&mut state.overlay, &pool_set)?;
            return Err(e);
        }

        let _ = self.events.send(ChainEvent::BlockUndone {
            id: block.id(),
            height: block.height(),
        });

        let replay = block.transactions.iter().cloned().chain(pool_set);
        let dropped = self.replay_pool(&mut state.overlay, replay);
        if dropped.is_empty() {
            Ok(block)
        } else {
            Err(ApplyError::Reconciliation {
                block: block.id(),
                dropped,
            })
        }
    }

    /// Undoes the confirmed effects of `block` and removes it from storage in
    /// one write set.
    fn revert_block(&self, block: &Block) -> Result<(), ApplyError> {
        let mut ledger = PendingLedger::new(&self.storage);
        for tx in block.transactions.iter().rev() {
            self.handlers
                .for_transaction(tx)
                .undo_confirmed(tx, &mut ledger)
                .map_err(rejected(tx.id()))?;
        }

        let mut writes = WriteSet::new();
        writes.extend(ledger.statements());
        for tx in &block.transactions {
            writes.push(Statement::DeleteRow {
                partition: self.handlers.for_transaction(tx).payload_partition(),
                key: tx.id(),
            });
            writes.push(Statement::DeleteTransaction(tx.id()));
        }
        writes.push(Statement::DeleteBlock(block.id()));
        self.storage.execute(writes)?;
        Ok(())
    }
}
