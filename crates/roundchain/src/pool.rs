//! Synthetic transaction pool.
//!
//! `take` does not remove anything: a transaction leaves the pool only when a block
//! carrying it is finalized. Proposals that never get notarized therefore lose nothing.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use roundchain_core::{SourceResult, TransactionSource};
use roundchain_types::TxnRef;
use tracing::debug;

#[derive(Default)]
struct PoolInner {
    pending: Vec<TxnRef>,
    known: HashSet<TxnRef>,
    committed: u64,
}

/// In-memory pool shared by one simulated node
#[derive(Default)]
pub struct TxnPool {
    inner: RwLock<PoolInner>,
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Transactions waiting for finalization
    pub pending: usize,
    /// Transactions removed by finalization
    pub committed: u64,
}

impl TxnPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool preloaded with `count` deterministic transactions.
    ///
    /// Every node generating from the same `tag` holds the same transactions.
    pub fn synthetic(tag: &str, count: usize) -> Self {
        let pool = Self::new();
        for i in 0..count {
            pool.submit(TxnRef::from_payload(format!("{}/txn/{}", tag, i).as_bytes()));
        }
        pool
    }

    /// Add a transaction; duplicates are ignored. Returns whether it was new.
    pub fn submit(&self, txn: TxnRef) -> bool {
        let mut inner = self.inner.write();
        if !inner.known.insert(txn) {
            return false;
        }
        inner.pending.push(txn);
        true
    }

    /// Whether `txn` is still pending
    pub fn contains(&self, txn: &TxnRef) -> bool {
        self.inner.read().pending.contains(txn)
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        PoolStats {
            pending: inner.pending.len(),
            committed: inner.committed,
        }
    }
}

#[async_trait]
impl TransactionSource for TxnPool {
    async fn take(&self, max_count: usize) -> SourceResult<Vec<TxnRef>> {
        Ok(self
            .inner
            .read()
            .pending
            .iter()
            .take(max_count)
            .copied()
            .collect())
    }

    async fn mark_committed(&self, txns: &[TxnRef]) -> SourceResult<()> {
        let done: HashSet<&TxnRef> = txns.iter().collect();
        let mut inner = self.inner.write();
        let before = inner.pending.len();
        inner.pending.retain(|txn| !done.contains(txn));
        let removed = before - inner.pending.len();
        inner.committed += removed as u64;
        debug!(removed, pending = inner.pending.len(), "Transactions committed");
        Ok(())
    }
}
