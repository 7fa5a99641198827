//! # Roundchain Types
//!
//! Core type definitions shared by the Roundchain crates:
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`TxnRef`] - opaque transaction references
//! - [`Block`] - round blocks, hashed and signed by their proposer
//!
//! ## Example
//!
//! ```rust
//! use roundchain_types::{Block, H256};
//!
//! let seed = H256::keccak256(b"genesis beacon");
//! let genesis = Block::genesis(seed, H256::NIL);
//! assert!(genesis.is_genesis());
//! assert_eq!(genesis.hash, genesis.compute_hash());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block;
pub mod hash;

// Re-export main types at crate root
pub use block::{Block, TxnRef, GENESIS_PROPOSER};
pub use hash::H256;

/// Round number; round 0 is genesis.
pub type RoundNumber = u64;

/// Identifier of a consensus participant.
pub type PartyId = u64;

/// Result type alias for Roundchain types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Roundchain types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// Block fails a structural check
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] roundchain_crypto::CryptoError),
}
