//! In-memory block store and a hash-chain state applier.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use roundchain_core::{BlockStore, StateApplier, StateResult, StorageResult};
use roundchain_types::{Block, RoundNumber, TxnRef, H256};

/// Finalized blocks, by hash
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<H256, Block>>,
}

impl MemoryBlockStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Stored block with the highest round
    pub fn head(&self) -> Option<Block> {
        self.blocks
            .read()
            .values()
            .max_by_key(|block| block.round)
            .cloned()
    }

    /// Stored block of `round`
    pub fn block_at(&self, round: RoundNumber) -> Option<Block> {
        self.blocks
            .read()
            .values()
            .find(|block| block.round == round)
            .cloned()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn write(&self, block: &Block) -> StorageResult<()> {
        self.blocks.write().insert(block.hash, block.clone());
        Ok(())
    }

    async fn read(&self, hash: &H256) -> StorageResult<Option<Block>> {
        Ok(self.blocks.read().get(hash).cloned())
    }
}

/// State root = keccak256(previous root || transaction hashes)
#[derive(Debug, Default, Clone, Copy)]
pub struct HashStateApplier;

impl HashStateApplier {
    /// Root reached by applying `txns` on top of `prev`
    pub fn next_root(prev: H256, txns: &[TxnRef]) -> H256 {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(txns.len() + 1);
        parts.push(prev.as_bytes());
        parts.extend(txns.iter().map(|txn| txn.0.as_bytes()));
        H256::keccak256_concat(&parts)
    }
}

#[async_trait]
impl StateApplier for HashStateApplier {
    async fn apply(&self, prev_state: H256, txns: &[TxnRef]) -> StateResult<H256> {
        Ok(Self::next_root(prev_state, txns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_root_depends_on_order() {
        let a = TxnRef::from_payload(b"a");
        let b = TxnRef::from_payload(b"b");
        let applier = HashStateApplier;
        let ab = applier.apply(H256::NIL, &[a, b]).await.unwrap();
        let ba = applier.apply(H256::NIL, &[b, a]).await.unwrap();
        assert_ne!(ab, ba);
        assert_eq!(ab, HashStateApplier::next_root(H256::NIL, &[a, b]));
    }

    #[tokio::test]
    async fn test_store_round_lookup() {
        let store = MemoryBlockStore::new();
        assert!(store.is_empty());
        let genesis = Block::genesis(H256::keccak256(b"seed"), H256::NIL);
        store.write(&genesis).await.unwrap();

        assert!(store.contains(&genesis.hash).await.unwrap());
        assert_eq!(store.block_at(0), Some(genesis.clone()));
        assert_eq!(store.head(), Some(genesis));
        assert_eq!(store.len(), 1);
    }
}
