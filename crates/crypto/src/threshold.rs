//! # Threshold BLS Primitives
//!
//! Shamir secret sharing over the BLS12-381 scalar field, Feldman commitments in G1
//! and Lagrange recovery of group signatures in G2.
//!
//! Partial signatures are ordinary [`BlsSignature`]s produced by a share's signing
//! key, so a recovered group signature verifies with [`BlsSignature::verify_with_domain`]
//! against the group public key.
//!
//! Parties are addressed by their evaluation index `x`. Index zero is reserved for
//! the shared secret itself and is rejected everywhere.
//!
//! ```rust
//! use roundchain_crypto::bls::DomainTag;
//! use roundchain_crypto::threshold::{deal, recover_signature};
//!
//! let mut rng = rand::thread_rng();
//! let dealt = deal(3, &[1, 2, 3, 4], &mut rng).unwrap();
//! let domain = DomainTag::new_beacon("devnet");
//!
//! let partials: Vec<_> = dealt.shares[..3]
//!     .iter()
//!     .map(|(x, share)| (*x, share.signing_key().unwrap().sign_with_domain(b"msg", &domain)))
//!     .collect();
//!
//! let group_sig = recover_signature(&partials).unwrap();
//! assert!(group_sig.verify_with_domain(b"msg", &dealt.group_public_key, &domain));
//! ```

use crate::bls::{BlsPrivateKey, BlsPublicKey, BlsSignature};
use crate::{CryptoError, Result};
use blstrs::{G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Group;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Evaluation index of a party in the sharing polynomial.
pub type ShareIndex = u64;

/// Number of shares needed out of `parties` for a threshold expressed in percent.
///
/// Rounds up and clamps the result to `1..=parties`.
pub fn threshold_from_percent(parties: usize, percent: u8) -> usize {
    let t = (parties * percent as usize).div_ceil(100);
    t.clamp(1, parties.max(1))
}

// ============================================================================
// Secret shares
// ============================================================================

/// A scalar share of a Shamir-shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretShare(Scalar);

impl SecretShare {
    /// Decode a share from its 32-byte big-endian encoding.
    ///
    /// Rejects wrong lengths, non-canonical scalars and zero.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidShare(format!("expected 32 bytes, got {}", bytes.len())))?;
        let scalar: Option<Scalar> = Scalar::from_bytes_be(&arr).into();
        let scalar =
            scalar.ok_or_else(|| CryptoError::InvalidShare("non-canonical scalar".to_string()))?;
        if bool::from(scalar.is_zero()) {
            return Err(CryptoError::InvalidShare("zero share".to_string()));
        }
        Ok(Self(scalar))
    }

    /// Encode the share as 32 big-endian bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes_be()
    }

    /// Sum shares received from every dealer into one aggregated share.
    pub fn sum<'a>(shares: impl IntoIterator<Item = &'a SecretShare>) -> Result<Self> {
        let total = shares
            .into_iter()
            .fold(Scalar::ZERO, |acc, share| acc + share.0);
        if bool::from(total.is_zero()) {
            return Err(CryptoError::InvalidShare("aggregated share is zero".to_string()));
        }
        Ok(Self(total))
    }

    /// The G1 public image of this share.
    pub fn public_key(&self) -> Result<BlsPublicKey> {
        g1_to_public_key(&(G1Projective::generator() * self.0))
    }

    /// A BLS signing key whose signatures are partial signatures for this share.
    pub fn signing_key(&self) -> Result<BlsPrivateKey> {
        BlsPrivateKey::from_bytes(&self.to_bytes())
    }

    /// Feldman check: does this share lie on the committed polynomial at `x`?
    pub fn verify(&self, commitment: &PublicCommitment, x: ShareIndex) -> bool {
        x != 0 && G1Projective::generator() * self.0 == commitment.evaluate(x)
    }
}

impl std::fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretShare").finish_non_exhaustive()
    }
}

// ============================================================================
// Polynomials and commitments
// ============================================================================

/// A random polynomial of degree `threshold - 1` whose constant term is a party's
/// contribution to the group secret.
pub struct SecretPolynomial {
    coefficients: Vec<Scalar>,
}

impl SecretPolynomial {
    /// Sample a polynomial for the given threshold.
    pub fn random(threshold: usize, rng: &mut impl RngCore) -> Result<Self> {
        if threshold == 0 {
            return Err(CryptoError::InvalidThreshold {
                threshold,
                parties: 0,
            });
        }
        let coefficients = (0..threshold).map(|_| Scalar::random(&mut *rng)).collect();
        Ok(Self { coefficients })
    }

    /// Number of shares needed to reconstruct the constant term.
    pub fn threshold(&self) -> usize {
        self.coefficients.len()
    }

    /// Evaluate the polynomial at `x` (Horner's rule).
    pub fn evaluate(&self, x: ShareIndex) -> Result<SecretShare> {
        if x == 0 {
            return Err(CryptoError::InvalidShare("index zero is reserved".to_string()));
        }
        let x = Scalar::from(x);
        let value = self
            .coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, c| acc * x + c);
        if bool::from(value.is_zero()) {
            return Err(CryptoError::InvalidShare("evaluation is zero".to_string()));
        }
        Ok(SecretShare(value))
    }

    /// Feldman commitment to every coefficient.
    pub fn commitment(&self) -> PublicCommitment {
        PublicCommitment {
            points: self
                .coefficients
                .iter()
                .map(|c| G1Projective::generator() * c)
                .collect(),
        }
    }
}

impl std::fmt::Debug for SecretPolynomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPolynomial")
            .field("threshold", &self.threshold())
            .finish_non_exhaustive()
    }
}

/// G1 images of a polynomial's coefficients.
///
/// Summing the commitments of every dealer yields a commitment to the aggregate
/// polynomial: its constant term is the group public key and its evaluation at a
/// party's index is that party's public key share.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicCommitment {
    points: Vec<G1Projective>,
}

impl PublicCommitment {
    /// Number of coefficients (the sharing threshold).
    pub fn threshold(&self) -> usize {
        self.points.len()
    }

    /// Evaluate the committed polynomial in the exponent at `x`.
    pub fn evaluate(&self, x: ShareIndex) -> G1Projective {
        let x = Scalar::from(x);
        self.points
            .iter()
            .rev()
            .fold(G1Projective::identity(), |acc, point| acc * x + point)
    }

    /// Commitment to the constant term.
    pub fn constant(&self) -> G1Projective {
        self.points
            .first()
            .copied()
            .unwrap_or_else(G1Projective::identity)
    }

    /// Public key for the constant term (the group key once commitments are aggregated).
    pub fn group_public_key(&self) -> Result<BlsPublicKey> {
        g1_to_public_key(&self.constant())
    }

    /// Public key share of the party at index `x`.
    pub fn public_key_share(&self, x: ShareIndex) -> Result<BlsPublicKey> {
        g1_to_public_key(&self.evaluate(x))
    }

    /// Coefficient-wise sum of several commitments of the same threshold.
    pub fn aggregate<'a>(commitments: impl IntoIterator<Item = &'a PublicCommitment>) -> Result<Self> {
        let mut iter = commitments.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| CryptoError::BlsError("cannot aggregate empty list".to_string()))?;
        let mut points = first.points.clone();
        for commitment in iter {
            if commitment.points.len() != points.len() {
                return Err(CryptoError::InvalidShare(format!(
                    "commitment threshold mismatch: {} != {}",
                    commitment.points.len(),
                    points.len()
                )));
            }
            for (acc, point) in points.iter_mut().zip(&commitment.points) {
                *acc += point;
            }
        }
        Ok(Self { points })
    }

    /// Compressed encoding of every coefficient commitment.
    pub fn to_bytes(&self) -> Vec<[u8; 48]> {
        self.points
            .iter()
            .map(|p| G1Affine::from(p).to_compressed())
            .collect()
    }

    /// Decode a commitment, validating every point.
    pub fn from_bytes(points: &[[u8; 48]]) -> Result<Self> {
        if points.is_empty() {
            return Err(CryptoError::InvalidShare("empty commitment".to_string()));
        }
        let points = points
            .iter()
            .map(|bytes| {
                let affine: Option<G1Affine> = G1Affine::from_compressed(bytes).into();
                affine
                    .map(G1Projective::from)
                    .ok_or_else(|| CryptoError::InvalidPublicKey("invalid commitment point".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { points })
    }
}

impl std::fmt::Debug for PublicCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicCommitment")
            .field("threshold", &self.threshold())
            .finish_non_exhaustive()
    }
}

impl Serialize for PublicCommitment {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded: Vec<String> = self.to_bytes().iter().map(hex::encode).collect();
        encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicCommitment {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        let points = encoded
            .iter()
            .map(|s| crate::bls::decode_fixed_hex::<48>(s))
            .collect::<Result<Vec<_>>>()
            .map_err(serde::de::Error::custom)?;
        PublicCommitment::from_bytes(&points).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Recovery
// ============================================================================

/// Lagrange coefficients at zero for the given distinct, non-zero indices.
pub fn lagrange_coefficients(indices: &[ShareIndex]) -> Result<Vec<Scalar>> {
    let mut seen = BTreeSet::new();
    for &x in indices {
        if x == 0 || !seen.insert(x) {
            return Err(CryptoError::DuplicateIndex(x));
        }
    }

    indices
        .iter()
        .map(|&xi| {
            let xi_s = Scalar::from(xi);
            let (num, den) = indices.iter().filter(|&&xj| xj != xi).fold(
                (Scalar::ONE, Scalar::ONE),
                |(num, den), &xj| {
                    let xj_s = Scalar::from(xj);
                    (num * xj_s, den * (xj_s - xi_s))
                },
            );
            let inverse: Option<Scalar> = den.invert().into();
            inverse
                .map(|inv| num * inv)
                .ok_or_else(|| CryptoError::BlsError("singular interpolation basis".to_string()))
        })
        .collect()
}

/// Combine partial signatures `(index, signature)` into the group signature.
///
/// Any set of at least `threshold` distinct valid partial signatures recovers the
/// same group signature. Callers pass exactly the subset they want combined.
pub fn recover_signature(partials: &[(ShareIndex, BlsSignature)]) -> Result<BlsSignature> {
    if partials.is_empty() {
        return Err(CryptoError::BlsError("no partial signatures".to_string()));
    }
    let indices: Vec<ShareIndex> = partials.iter().map(|(x, _)| *x).collect();
    let lambdas = lagrange_coefficients(&indices)?;

    let mut acc = G2Projective::identity();
    for ((_, signature), lambda) in partials.iter().zip(&lambdas) {
        let point: Option<G2Affine> = G2Affine::from_compressed(&signature.to_bytes()).into();
        let point = point
            .ok_or_else(|| CryptoError::InvalidSignature("partial signature not in G2".to_string()))?;
        acc += G2Projective::from(point) * lambda;
    }

    BlsSignature::from_bytes(&G2Affine::from(acc).to_compressed())
}

fn g1_to_public_key(point: &G1Projective) -> Result<BlsPublicKey> {
    if bool::from(point.is_identity()) {
        return Err(CryptoError::InvalidPublicKey("identity point".to_string()));
    }
    BlsPublicKey::from_bytes(&G1Affine::from(point).to_compressed())
}

// ============================================================================
// Trusted dealer
// ============================================================================

/// Output of [`deal`].
#[derive(Debug, Clone)]
pub struct DealtKeys {
    /// Group public key
    pub group_public_key: BlsPublicKey,
    /// Commitment to the dealer polynomial
    pub commitment: PublicCommitment,
    /// One share per requested index, in request order
    pub shares: Vec<(ShareIndex, SecretShare)>,
}

/// Deal consistent shares from a single polynomial.
///
/// Useful for tests and single-operator deployments where running a DKG buys nothing.
pub fn deal(threshold: usize, indices: &[ShareIndex], rng: &mut impl RngCore) -> Result<DealtKeys> {
    if threshold == 0 || threshold > indices.len() {
        return Err(CryptoError::InvalidThreshold {
            threshold,
            parties: indices.len(),
        });
    }
    // Rejects duplicate and zero indices before any sampling.
    lagrange_coefficients(indices)?;

    let polynomial = SecretPolynomial::random(threshold, rng)?;
    let commitment = polynomial.commitment();
    let shares = indices
        .iter()
        .map(|&x| polynomial.evaluate(x).map(|share| (x, share)))
        .collect::<Result<Vec<_>>>()?;

    Ok(DealtKeys {
        group_public_key: commitment.group_public_key()?,
        commitment,
        shares,
    })
}
