//! Per-round participant ranking.
//!
//! Each party's score is `sha256("ROUNDCHAIN_RANK_V1" || seed || party_id_le)`.
//! Parties are ordered by `(score, party_id)` and rank is the position in that
//! order: rank 0 leads the round and lower ranks win proposal tie-breaks.

use std::collections::HashMap;

use roundchain_types::{PartyId, H256};
use sha2::{Digest, Sha256};

use crate::types::ParticipantSet;

const RANK_DOMAIN: &[u8] = b"ROUNDCHAIN_RANK_V1";

/// Deterministic total order of the participants for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTable {
    order: Vec<PartyId>,
    ranks: HashMap<PartyId, usize>,
}

impl RankTable {
    /// Rank every participant from the round's seed.
    pub fn compute(seed: &H256, participants: &ParticipantSet) -> Self {
        let mut scored: Vec<([u8; 32], PartyId)> = participants
            .ids()
            .map(|id| (Self::score(seed, id), id))
            .collect();
        scored.sort();

        let order: Vec<PartyId> = scored.into_iter().map(|(_, id)| id).collect();
        let ranks = order.iter().enumerate().map(|(rank, id)| (*id, rank)).collect();
        Self { order, ranks }
    }

    fn score(seed: &H256, party: PartyId) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(RANK_DOMAIN);
        hasher.update(seed.as_bytes());
        hasher.update(party.to_le_bytes());
        hasher.finalize().into()
    }

    /// Rank of `party`, if it participates
    pub fn rank_of(&self, party: PartyId) -> Option<usize> {
        self.ranks.get(&party).copied()
    }

    /// The rank-0 party
    pub fn leader(&self) -> Option<PartyId> {
        self.order.first().copied()
    }

    /// Party holding `rank`
    pub fn party_at(&self, rank: usize) -> Option<PartyId> {
        self.order.get(rank).copied()
    }

    /// Whether `party` is among the `num_generators` best-ranked parties
    pub fn is_generator(&self, party: PartyId, num_generators: usize) -> bool {
        self.rank_of(party)
            .map(|rank| rank < num_generators)
            .unwrap_or(false)
    }

    /// Parties ordered by rank
    pub fn order(&self) -> &[PartyId] {
        &self.order
    }

    /// Number of ranked parties
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
