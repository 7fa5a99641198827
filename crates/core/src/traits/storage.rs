//! Block storage trait.

use async_trait::async_trait;
use roundchain_types::{Block, H256};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A database I/O error occurred.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Data corruption was detected.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// A serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error.
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent store of finalized blocks, keyed by block hash.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Persist a block. Writing the same block twice is not an error.
    async fn write(&self, block: &Block) -> StorageResult<()>;

    /// Read a block by hash.
    ///
    /// Returns `Ok(None)` if the block is unknown.
    async fn read(&self, hash: &H256) -> StorageResult<Option<Block>>;

    /// Check whether a block is stored.
    async fn contains(&self, hash: &H256) -> StorageResult<bool> {
        Ok(self.read(hash).await?.is_some())
    }
}
