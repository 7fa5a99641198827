//! Collaborator traits for the Roundchain consensus engine.
//!
//! The engine does not own a transaction pool, a state machine, a database or a
//! network stack. It consumes them through the traits below:
//!
//! - **Chain**: [`TransactionSource`], [`StateApplier`], [`FinalizationObserver`]
//! - **Storage**: [`BlockStore`]
//! - **Transport**: [`PeerSet`]
//!
//! ```ignore
//! use roundchain_core::traits::{BlockStore, PeerSet};
//!
//! async fn persist<S: BlockStore>(store: &S, block: &Block) -> StorageResult<()> {
//!     store.write(block).await
//! }
//! ```

mod chain;
mod storage;
mod transport;

pub use chain::*;
pub use storage::*;
pub use transport::*;
