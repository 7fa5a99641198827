//! # Roundchain Crypto
//!
//! Cryptographic primitives for the Roundchain consensus engine.
//!
//! This crate provides:
//! - **Keccak256 hashing** - block hashes, beacon outputs and transaction references
//! - **BLS12-381 signatures** - per-node signing keys with domain separation
//! - **Threshold BLS** - Shamir shares, Feldman commitments and signature recovery
//!
//! ## Example
//!
//! ```rust
//! use roundchain_crypto::{keccak256, BlsPrivateKey, DomainTag};
//!
//! // Hash some data
//! let hash = keccak256(b"hello world");
//!
//! // Sign a ticket with a node key
//! let key = BlsPrivateKey::random();
//! let domain = DomainTag::new_ticket("devnet");
//! let signature = key.sign_with_domain(&hash, &domain);
//! assert!(signature.verify_with_domain(&hash, &key.public_key(), &domain));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod bls;
pub mod hash;
pub mod threshold;

// Re-export commonly used items
pub use bls::{BlsPrivateKey, BlsPublicKey, BlsSignature, DomainTag, MessageType};
pub use hash::{keccak256, keccak256_concat, Hasher};
pub use threshold::{
    deal, lagrange_coefficients, recover_signature, threshold_from_percent, DealtKeys,
    PublicCommitment, SecretPolynomial, SecretShare, ShareIndex,
};

/// Common type alias for 32-byte hash
pub type Hash = [u8; 32];

/// Error types for cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("signature verification failed")]
    VerificationFailed,

    /// Malformed or out-of-range secret share
    #[error("invalid secret share: {0}")]
    InvalidShare(String),

    /// Threshold is zero or exceeds the number of parties
    #[error("invalid threshold {threshold} for {parties} parties")]
    InvalidThreshold {
        /// Requested threshold
        threshold: usize,
        /// Number of parties
        parties: usize,
    },

    /// Interpolation index repeated or zero
    #[error("duplicate or reserved share index {0}")]
    DuplicateIndex(u64),

    /// BLS operation failed
    #[error("BLS operation failed: {0}")]
    BlsError(String),

    /// Invalid input length
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Hex decoding error
    #[error("hex decoding error: {0}")]
    HexError(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::HexError(e.to_string())
    }
}

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
