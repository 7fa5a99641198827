//! Transaction, state and finalization collaborators.

use async_trait::async_trait;
use roundchain_types::{Block, RoundNumber, TxnRef, H256};
use thiserror::Error;

/// Errors reported by the transaction source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The pool is not accepting requests.
    #[error("transaction source unavailable: {0}")]
    Unavailable(String),

    /// Generic internal error.
    #[error("internal transaction source error: {0}")]
    Internal(String),
}

/// Result type for transaction source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors reported by the state applier.
#[derive(Error, Debug)]
pub enum StateError {
    /// The predecessor state is not known.
    #[error("unknown state root: {0}")]
    UnknownState(H256),

    /// A transaction could not be applied.
    #[error("transaction {txn} rejected: {reason}")]
    Rejected {
        /// Offending transaction.
        txn: TxnRef,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type for state applier operations.
pub type StateResult<T> = Result<T, StateError>;

/// Supplier of pending transactions for block proposals.
#[async_trait]
pub trait TransactionSource: Send + Sync + 'static {
    /// Up to `max_count` pending transactions, oldest first.
    ///
    /// Returned transactions stay pending until [`mark_committed`](Self::mark_committed).
    async fn take(&self, max_count: usize) -> SourceResult<Vec<TxnRef>>;

    /// Remove transactions that a finalized block committed.
    async fn mark_committed(&self, txns: &[TxnRef]) -> SourceResult<()>;
}

/// Applies transactions to a state and returns the new state root.
#[async_trait]
pub trait StateApplier: Send + Sync + 'static {
    /// Apply `txns` in order on top of `prev_state`.
    async fn apply(&self, prev_state: H256, txns: &[TxnRef]) -> StateResult<H256>;
}

/// Downstream consumer of finalized blocks (indexers, storage mirrors, tests).
#[async_trait]
pub trait FinalizationObserver: Send + Sync + 'static {
    /// Called exactly once per finalized round, in round order.
    async fn on_round_finalized(&self, round: RoundNumber, block: &Block);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl FinalizationObserver for NoopObserver {
    async fn on_round_finalized(&self, _round: RoundNumber, _block: &Block) {}
}
