//! # BLS12-381 Node Signing Keys
//!
//! Every participant holds a long-lived BLS signing key that is independent of its
//! threshold key share. It signs block proposals and verification tickets; the
//! threshold share only ever signs random beacon messages.
//!
//! Keys use the `min_pk` layout:
//!
//! - `BlsPrivateKey` - 32-byte scalar
//! - `BlsPublicKey` - 48-byte compressed G1 point
//! - `BlsSignature` - 96-byte compressed G2 point
//!
//! Every signature is bound to a [`DomainTag`], so a ticket signature can never be
//! replayed as a proposal signature or across chains.
//!
//! ## Example
//!
//! ```rust
//! use roundchain_crypto::bls::{BlsPrivateKey, DomainTag};
//!
//! let sk = BlsPrivateKey::random();
//! let pk = sk.public_key();
//! let domain = DomainTag::new_ticket("devnet");
//! let sig = sk.sign_with_domain(b"block hash", &domain);
//! assert!(sig.verify_with_domain(b"block hash", &pk, &domain));
//! ```

use crate::{CryptoError, Result};
use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Base domain separation tag prefix for Roundchain BLS signatures.
const DST_PREFIX: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_ROUNDCHAIN_";

// ============================================================================
// Domain Separation
// ============================================================================

/// Message types for domain separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Block proposal signed by its generator
    Proposal,
    /// Verification ticket signed by a verifier
    Ticket,
    /// Random beacon message signed with a threshold share
    Beacon,
    /// Generic/custom message type
    Custom,
}

impl MessageType {
    /// Get the string tag for this message type.
    pub fn as_tag(&self) -> &'static str {
        match self {
            MessageType::Proposal => "PROPOSAL",
            MessageType::Ticket => "TICKET",
            MessageType::Beacon => "BEACON",
            MessageType::Custom => "CUSTOM",
        }
    }
}

/// Domain separation tag for BLS signatures.
///
/// Format: `ROUNDCHAIN_<MESSAGE_TYPE>_<CHAIN_ID>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainTag {
    message_type: MessageType,
    chain_id: String,
    /// Cached full DST bytes
    dst: Vec<u8>,
}

impl DomainTag {
    /// Create a new domain tag.
    pub fn new(message_type: MessageType, chain_id: impl Into<String>) -> Self {
        let chain_id = chain_id.into();
        let dst = Self::build_dst(&message_type, &chain_id);
        Self {
            message_type,
            chain_id,
            dst,
        }
    }

    /// Create a domain tag for block proposals.
    pub fn new_proposal(chain_id: impl Into<String>) -> Self {
        Self::new(MessageType::Proposal, chain_id)
    }

    /// Create a domain tag for verification tickets.
    pub fn new_ticket(chain_id: impl Into<String>) -> Self {
        Self::new(MessageType::Ticket, chain_id)
    }

    /// Create a domain tag for random beacon shares and group signatures.
    pub fn new_beacon(chain_id: impl Into<String>) -> Self {
        Self::new(MessageType::Beacon, chain_id)
    }

    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Get the chain ID.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Get the full DST bytes for signing.
    pub fn dst(&self) -> &[u8] {
        &self.dst
    }

    fn build_dst(message_type: &MessageType, chain_id: &str) -> Vec<u8> {
        let mut dst = Vec::with_capacity(DST_PREFIX.len() + 16 + chain_id.len());
        dst.extend_from_slice(DST_PREFIX);
        dst.extend_from_slice(message_type.as_tag().as_bytes());
        dst.push(b'_');
        dst.extend_from_slice(chain_id.as_bytes());
        dst
    }
}

// ============================================================================
// BLS Private Key
// ============================================================================

/// BLS private key (secret key)
///
/// A 32-byte scalar used for signing. Must be kept secret.
#[derive(Clone)]
pub struct BlsPrivateKey {
    inner: SecretKey,
}

impl BlsPrivateKey {
    /// Generate a random BLS private key using a cryptographically secure RNG.
    pub fn random() -> Self {
        let mut ikm = [0u8; 32];
        loop {
            rand::rngs::OsRng.fill_bytes(&mut ikm);
            // key_gen only rejects input keying material shorter than 32 bytes
            if let Ok(sk) = SecretKey::key_gen(&ikm, &[]) {
                return Self { inner: sk };
            }
        }
    }

    /// Create a BLS private key from input keying material (at least 32 bytes).
    pub fn from_seed(ikm: &[u8]) -> Result<Self> {
        if ikm.len() < 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: ikm.len(),
            });
        }
        let sk = SecretKey::key_gen(ikm, &[])
            .map_err(|_| CryptoError::InvalidPrivateKey("key generation failed".to_string()))?;
        Ok(Self { inner: sk })
    }

    /// Create a BLS private key from a 32-byte big-endian scalar.
    ///
    /// Rejects zero and values outside the scalar field.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let sk = SecretKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{:?}", e)))?;
        Ok(Self { inner: sk })
    }

    /// Create a BLS private key from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let arr: [u8; 32] = decode_fixed_hex(hex)?;
        Self::from_bytes(&arr)
    }

    /// Get the raw bytes of the private key.
    ///
    /// # Security
    ///
    /// Be careful with the returned bytes - they are the secret key!
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Derive the public key from this private key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Sign a message under the given domain.
    pub fn sign_with_domain(&self, message: &[u8], domain: &DomainTag) -> BlsSignature {
        BlsSignature {
            inner: self.inner.sign(message, domain.dst(), &[]),
        }
    }
}

impl std::fmt::Debug for BlsPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsPrivateKey")
            .field("public_key", &self.public_key().to_hex())
            .finish()
    }
}

// ============================================================================
// BLS Public Key
// ============================================================================

/// BLS public key (48 bytes, G1 point)
#[derive(Clone)]
pub struct BlsPublicKey {
    inner: PublicKey,
}

impl BlsPublicKey {
    /// Create a public key from compressed bytes (48 bytes).
    ///
    /// Validates that the bytes represent a valid point on the curve
    /// and are in canonical form.
    pub fn from_bytes(bytes: &[u8; 48]) -> Result<Self> {
        let pk = PublicKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;

        if pk.to_bytes() != *bytes {
            return Err(CryptoError::BlsError(
                "non-canonical public key encoding".to_string(),
            ));
        }

        Ok(Self { inner: pk })
    }

    /// Create a public key from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let arr: [u8; 48] = decode_fixed_hex(hex)?;
        Self::from_bytes(&arr)
    }

    /// Get the compressed public key bytes (48 bytes).
    pub fn to_bytes(&self) -> [u8; 48] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded public key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature over `message` under `domain`.
    pub fn verify_with_domain(
        &self,
        message: &[u8],
        signature: &BlsSignature,
        domain: &DomainTag,
    ) -> bool {
        signature.verify_with_domain(message, self, domain)
    }
}

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl PartialOrd for BlsPublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlsPublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl std::hash::Hash for BlsPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsPublicKey")
            .field("bytes", &self.to_hex())
            .finish()
    }
}

// ============================================================================
// BLS Signature
// ============================================================================

/// BLS signature (96 bytes, G2 point)
#[derive(Clone)]
pub struct BlsSignature {
    inner: Signature,
}

impl BlsSignature {
    /// Create a signature from compressed bytes (96 bytes).
    ///
    /// Validates canonical encoding to prevent malleability attacks.
    pub fn from_bytes(bytes: &[u8; 96]) -> Result<Self> {
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;

        if sig.to_bytes() != *bytes {
            return Err(CryptoError::BlsError(
                "non-canonical signature encoding".to_string(),
            ));
        }

        Ok(Self { inner: sig })
    }

    /// Create a signature from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let arr: [u8; 96] = decode_fixed_hex(hex)?;
        Self::from_bytes(&arr)
    }

    /// Get the compressed signature bytes (96 bytes).
    pub fn to_bytes(&self) -> [u8; 96] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded signature.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify the signature with domain separation.
    pub fn verify_with_domain(
        &self,
        message: &[u8],
        public_key: &BlsPublicKey,
        domain: &DomainTag,
    ) -> bool {
        let result = self
            .inner
            .verify(true, message, domain.dst(), &[], &public_key.inner, true);
        result == BLST_ERROR::BLST_SUCCESS
    }
}

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsSignature")
            .field("bytes", &self.to_hex())
            .finish()
    }
}

// ============================================================================
// Serde (hex for human-readable formats, raw bytes otherwise)
// ============================================================================

macro_rules! impl_serde_bytes {
    ($ty:ty, $len:expr) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                let bytes = self.to_bytes();
                if serializer.is_human_readable() {
                    serializer.serialize_str(&hex::encode(bytes))
                } else {
                    serializer.serialize_bytes(&bytes)
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    <$ty>::from_hex(&s).map_err(serde::de::Error::custom)
                } else {
                    let bytes = <Vec<u8>>::deserialize(deserializer)?;
                    let arr: [u8; $len] = bytes.as_slice().try_into().map_err(|_| {
                        serde::de::Error::custom(format!(
                            "expected {} bytes, got {}",
                            $len,
                            bytes.len()
                        ))
                    })?;
                    <$ty>::from_bytes(&arr).map_err(serde::de::Error::custom)
                }
            }
        }
    };
}

impl_serde_bytes!(BlsPublicKey, 48);
impl_serde_bytes!(BlsSignature, 96);

/// Decode a hex string (optional `0x` prefix) into a fixed-size array.
pub(crate) fn decode_fixed_hex<const N: usize>(hex: &str) -> Result<[u8; N]> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let bytes = hex::decode(hex)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        })
}
