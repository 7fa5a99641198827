//! Block types for Roundchain.
//!
//! - [`TxnRef`] - opaque reference to a transaction held by the transaction source
//! - [`Block`] - a round's candidate block, content-addressed by [`Block::hash`]

use crate::{Error, PartyId, Result, RoundNumber, H256};
use roundchain_crypto::{BlsPrivateKey, BlsPublicKey, BlsSignature, DomainTag, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proposer id recorded in the genesis block.
pub const GENESIS_PROPOSER: PartyId = PartyId::MAX;

/// Reference to a transaction in the external transaction source.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnRef(pub H256);

impl TxnRef {
    /// Reference a transaction by the Keccak256 hash of its payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self(H256::keccak256(payload))
    }

    /// Raw reference bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for TxnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnRef({})", self.0.short())
    }
}

impl fmt::Display for TxnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<H256> for TxnRef {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

/// A candidate block for one round.
///
/// The hash covers every field except `hash` and `signature`. Blocks are immutable
/// once built: construct them with [`Block::new_signed`] or [`Block::genesis`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Content hash
    pub hash: H256,
    /// Round this block was proposed in
    pub round: RoundNumber,
    /// Hash of the notarized predecessor
    pub prev_hash: H256,
    /// Proposing party
    pub proposer_id: PartyId,
    /// Random beacon output of `round`
    pub random_seed: H256,
    /// Transactions included in this block
    pub transactions: Vec<TxnRef>,
    /// State root after applying `transactions` on the predecessor's state
    pub state_root: H256,
    /// Proposer signature over `hash`; `None` only for genesis
    pub signature: Option<BlsSignature>,
}

impl Block {
    /// Build a block, compute its hash and sign it.
    #[allow(clippy::too_many_arguments)]
    pub fn new_signed(
        round: RoundNumber,
        prev_hash: H256,
        proposer_id: PartyId,
        random_seed: H256,
        transactions: Vec<TxnRef>,
        state_root: H256,
        key: &BlsPrivateKey,
        domain: &DomainTag,
    ) -> Self {
        let hash = Self::hash_fields(
            round,
            &prev_hash,
            proposer_id,
            &random_seed,
            &state_root,
            &transactions,
        );
        let signature = key.sign_with_domain(hash.as_bytes(), domain);
        Self {
            hash,
            round,
            prev_hash,
            proposer_id,
            random_seed,
            transactions,
            state_root,
            signature: Some(signature),
        }
    }

    /// The genesis block of round 0.
    pub fn genesis(random_seed: H256, state_root: H256) -> Self {
        let hash = Self::hash_fields(0, &H256::NIL, GENESIS_PROPOSER, &random_seed, &state_root, &[]);
        Self {
            hash,
            round: 0,
            prev_hash: H256::NIL,
            proposer_id: GENESIS_PROPOSER,
            random_seed,
            transactions: Vec::new(),
            state_root,
            signature: None,
        }
    }

    /// Whether this is a genesis block.
    pub fn is_genesis(&self) -> bool {
        self.round == 0 && self.prev_hash.is_nil()
    }

    /// Recompute the content hash from the block fields.
    pub fn compute_hash(&self) -> H256 {
        Self::hash_fields(
            self.round,
            &self.prev_hash,
            self.proposer_id,
            &self.random_seed,
            &self.state_root,
            &self.transactions,
        )
    }

    /// Check that the stored hash matches the content.
    pub fn validate_hash(&self) -> Result<()> {
        let computed = self.compute_hash();
        if computed != self.hash {
            return Err(Error::InvalidBlock(format!(
                "hash mismatch: stored {}, computed {}",
                self.hash, computed
            )));
        }
        Ok(())
    }

    /// Verify the proposer signature over the block hash.
    pub fn verify_signature(&self, proposer_key: &BlsPublicKey, domain: &DomainTag) -> bool {
        self.signature
            .as_ref()
            .map(|sig| sig.verify_with_domain(self.hash.as_bytes(), proposer_key, domain))
            .unwrap_or(false)
    }

    /// Whether the block includes a transaction.
    pub fn contains(&self, txn: &TxnRef) -> bool {
        self.transactions.contains(txn)
    }

    fn hash_fields(
        round: RoundNumber,
        prev_hash: &H256,
        proposer_id: PartyId,
        random_seed: &H256,
        state_root: &H256,
        transactions: &[TxnRef],
    ) -> H256 {
        let mut hasher = Hasher::new();
        hasher.update(&round.to_le_bytes());
        hasher.update(prev_hash.as_bytes());
        hasher.update(&proposer_id.to_le_bytes());
        hasher.update(random_seed.as_bytes());
        hasher.update(state_root.as_bytes());
        hasher.update(&(transactions.len() as u64).to_le_bytes());
        for txn in transactions {
            hasher.update(txn.as_bytes());
        }
        H256::new(hasher.finalize())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block(round={}, hash={}, proposer={}, txns={})",
            self.round,
            self.hash.short(),
            self.proposer_id,
            self.transactions.len()
        )
    }
}
