//! Keccak256 hashing.
//!
//! Block hashes, beacon outputs and transaction references are all Keccak256
//! digests. Use [`keccak256`] for one-shot hashing and [`Hasher`] when the input
//! is assembled from many fields.

use sha3::{Digest, Keccak256};

/// Compute the Keccak256 hash of the input data.
///
/// ```rust
/// use roundchain_crypto::keccak256;
///
/// let hash = keccak256(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
#[inline]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak256 hash of several inputs without concatenating them first.
#[inline]
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A streaming Keccak256 hasher.
///
/// ```rust
/// use roundchain_crypto::Hasher;
///
/// let mut hasher = Hasher::new();
/// hasher.update(&7u64.to_le_bytes());
/// hasher.update(b"payload");
/// let digest = hasher.finalize();
/// ```
#[derive(Clone)]
pub struct Hasher {
    inner: Keccak256,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a new Keccak256 hasher.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: Keccak256::new(),
        }
    }

    /// Feed more data into the hash.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and return the digest.
    #[inline]
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_concat_matches_streaming() {
        let direct = keccak256(b"round7seed");
        let concat = keccak256_concat(&[b"round", b"7", b"seed"]);

        let mut hasher = Hasher::new();
        hasher.update(b"round");
        hasher.update(b"7");
        hasher.update(b"seed");

        assert_eq!(direct, concat);
        assert_eq!(direct, hasher.finalize());
    }
}
