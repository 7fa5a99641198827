//! # Roundchain Core - Collaborator Interfaces
//!
//! Traits for everything the consensus engine consumes but does not implement:
//!
//! - **Transactions**: [`TransactionSource`] supplies pending transactions
//! - **State**: [`StateApplier`] turns a state root and transactions into a new root
//! - **Storage**: [`BlockStore`] persists finalized blocks
//! - **Transport**: [`PeerSet`] delivers typed messages to participants
//! - **Downstream**: [`FinalizationObserver`] is told about every finalized round
//!
//! All traits are async (`async_trait`) and require `Send + Sync`, so implementations
//! can be shared behind `Arc<dyn Trait>` across engine tasks.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod traits;

// Re-export commonly used types
pub use traits::{
    // Chain
    FinalizationObserver, NoopObserver, SourceError, SourceResult, StateApplier, StateError,
    StateResult, TransactionSource,
    // Storage
    BlockStore, StorageError, StorageResult,
    // Transport
    PeerError, PeerResult, PeerSet,
};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use roundchain_types::{Block, H256};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct MapStore {
        blocks: Mutex<HashMap<H256, Block>>,
    }

    #[async_trait]
    impl BlockStore for MapStore {
        async fn write(&self, block: &Block) -> StorageResult<()> {
            self.blocks.lock().insert(block.hash, block.clone());
            Ok(())
        }

        async fn read(&self, hash: &H256) -> StorageResult<Option<Block>> {
            Ok(self.blocks.lock().get(hash).cloned())
        }
    }

    #[tokio::test]
    async fn test_contains_uses_read() {
        let store: Arc<dyn BlockStore> = Arc::new(MapStore::default());
        let genesis = Block::genesis(H256::keccak256(b"seed"), H256::NIL);

        assert!(!store.contains(&genesis.hash).await.unwrap());
        store.write(&genesis).await.unwrap();
        assert!(store.contains(&genesis.hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_noop_observer() {
        let observer: Arc<dyn FinalizationObserver> = Arc::new(NoopObserver);
        let genesis = Block::genesis(H256::NIL, H256::NIL);
        observer.on_round_finalized(0, &genesis).await;
    }
}
