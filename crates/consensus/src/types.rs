//! Core consensus types: participants, verification tickets and notarizations.

use roundchain_crypto::{BlsPrivateKey, BlsPublicKey, BlsSignature, DomainTag, ShareIndex};
use roundchain_types::{Block, PartyId, RoundNumber, GENESIS_PROPOSER, H256};
use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, ConsensusResult};

/// Threshold-arithmetic index of a party. Index 0 is the shared secret itself.
///
/// Every participant has an index: [`ParticipantSet::new`] rejects `PartyId::MAX`.
#[inline]
pub fn share_index(party: PartyId) -> ShareIndex {
    party.saturating_add(1)
}

/// A consensus participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Party identifier
    pub id: PartyId,
    /// Node signing key for proposals and tickets (distinct from the threshold share)
    pub signing_key: BlsPublicKey,
    /// Weight under a stake-based quorum rule
    pub stake: u64,
}

impl Participant {
    /// Create a participant
    pub fn new(id: PartyId, signing_key: BlsPublicKey, stake: u64) -> Self {
        Self {
            id,
            signing_key,
            stake,
        }
    }
}

/// The fixed participant set, sorted by party id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSet {
    participants: Vec<Participant>,
    total_stake: u64,
}

impl ParticipantSet {
    /// Build a set. Later entries with a repeated id are dropped.
    ///
    /// Fails with [`ConsensusError::ReservedPartyId`] for the genesis proposer id, which
    /// also has no threshold index.
    pub fn new(mut participants: Vec<Participant>) -> ConsensusResult<Self> {
        if let Some(reserved) = participants
            .iter()
            .find(|p| p.id == GENESIS_PROPOSER || p.id.checked_add(1).is_none())
        {
            return Err(ConsensusError::ReservedPartyId(reserved.id));
        }
        participants.sort_by_key(|p| p.id);
        participants.dedup_by_key(|p| p.id);
        let total_stake = participants.iter().map(|p| p.stake).sum();
        Ok(Self {
            participants,
            total_stake,
        })
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Look up a participant by id
    pub fn get(&self, id: PartyId) -> Option<&Participant> {
        self.participants
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|i| &self.participants[i])
    }

    /// Whether `id` is a participant
    pub fn contains(&self, id: PartyId) -> bool {
        self.get(id).is_some()
    }

    /// Participant ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = PartyId> + '_ {
        self.participants.iter().map(|p| p.id)
    }

    /// Iterate over participants in id order
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Sum of all stakes
    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }
}

/// Signature domains for one chain
#[derive(Debug, Clone)]
pub struct Domains {
    /// Block proposals
    pub proposal: DomainTag,
    /// Verification tickets
    pub ticket: DomainTag,
    /// Beacon shares
    pub beacon: DomainTag,
}

impl Domains {
    /// Domains for `chain_id`
    pub fn new(chain_id: &str) -> Self {
        Self {
            proposal: DomainTag::new_proposal(chain_id),
            ticket: DomainTag::new_ticket(chain_id),
            beacon: DomainTag::new_beacon(chain_id),
        }
    }
}

/// A verifier's signed endorsement of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTicket {
    /// Endorsed block
    pub block_hash: H256,
    /// Round of the block
    pub round: RoundNumber,
    /// Signing verifier
    pub verifier_id: PartyId,
    /// Signature over [`VerificationTicket::signing_bytes`]
    pub signature: BlsSignature,
}

impl VerificationTicket {
    /// Sign a ticket for `block_hash` in `round`.
    pub fn sign(
        block_hash: H256,
        round: RoundNumber,
        verifier_id: PartyId,
        key: &BlsPrivateKey,
        domain: &DomainTag,
    ) -> Self {
        let signature = key.sign_with_domain(&Self::signing_bytes(&block_hash, round), domain);
        Self {
            block_hash,
            round,
            verifier_id,
            signature,
        }
    }

    /// Bytes a ticket signature covers: `block_hash || round_le`.
    pub fn signing_bytes(block_hash: &H256, round: RoundNumber) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(40);
        bytes.extend_from_slice(block_hash.as_bytes());
        bytes.extend_from_slice(&round.to_le_bytes());
        bytes
    }

    /// Verify the ticket against the verifier's signing key.
    pub fn verify(&self, verifier_key: &BlsPublicKey, domain: &DomainTag) -> bool {
        self.signature.verify_with_domain(
            &Self::signing_bytes(&self.block_hash, self.round),
            verifier_key,
            domain,
        )
    }
}

/// A quorum of tickets for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notarization {
    /// Notarized block
    pub block_hash: H256,
    /// Round of the block
    pub round: RoundNumber,
    /// Distinct tickets, ordered by verifier id
    pub tickets: Vec<VerificationTicket>,
}

impl Notarization {
    /// The self-evident notarization of the genesis block.
    pub fn genesis(block: &Block) -> Self {
        Self {
            block_hash: block.hash,
            round: block.round,
            tickets: Vec::new(),
        }
    }

    /// Ids of the verifiers whose tickets are included
    pub fn signers(&self) -> Vec<PartyId> {
        self.tickets.iter().map(|t| t.verifier_id).collect()
    }
}
