//! Verification ticket collection and quorum detection.
//!
//! This module handles:
//! - Collecting tickets for every candidate block of one round
//! - Verifying ticket signatures against the verifiers' signing keys
//! - Detecting when a block's tickets reach the quorum rule
//! - Materializing a [`Notarization`] from a block's tickets

use std::collections::{BTreeMap, HashMap};

use roundchain_crypto::DomainTag;
use roundchain_types::{PartyId, RoundNumber, H256};
use tracing::{debug, trace, warn};

use crate::quorum::QuorumRule;
use crate::types::{Notarization, ParticipantSet, VerificationTicket};

/// Error types for ticket set operations
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    /// Ticket is for another round
    #[error("ticket round {ticket_round} does not match expected {expected_round}")]
    WrongRound {
        ticket_round: RoundNumber,
        expected_round: RoundNumber,
    },

    /// Verifier is not a participant
    #[error("unknown verifier {0}")]
    UnknownVerifier(PartyId),

    /// Signature does not verify under the verifier's key
    #[error("invalid ticket signature from verifier {0}")]
    InvalidSignature(PartyId),
}

/// Result of adding one ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketOutcome {
    /// The ticket was new and counted
    pub accepted: bool,
    /// The ticket's block has reached quorum
    pub quorum_reached: bool,
}

/// Tickets for one round, grouped by block hash
#[derive(Debug, Clone)]
pub struct TicketSet {
    round: RoundNumber,
    tickets: HashMap<H256, BTreeMap<PartyId, VerificationTicket>>,
    weight_by_hash: HashMap<H256, u64>,
}

impl TicketSet {
    /// Create an empty set for `round`
    pub fn new(round: RoundNumber) -> Self {
        Self {
            round,
            tickets: HashMap::new(),
            weight_by_hash: HashMap::new(),
        }
    }

    /// Round of this set
    pub fn round(&self) -> RoundNumber {
        self.round
    }

    /// Add a ticket with signature verification.
    ///
    /// A repeated `(block_hash, verifier_id)` pair is ignored and reported with
    /// `accepted = false`. `quorum_reached` reflects the ticket's block after the call.
    pub fn add_ticket(
        &mut self,
        ticket: VerificationTicket,
        participants: &ParticipantSet,
        rule: &dyn QuorumRule,
        domain: &DomainTag,
    ) -> Result<TicketOutcome, TicketError> {
        if ticket.round != self.round {
            return Err(TicketError::WrongRound {
                ticket_round: ticket.round,
                expected_round: self.round,
            });
        }

        let verifier = participants
            .get(ticket.verifier_id)
            .ok_or(TicketError::UnknownVerifier(ticket.verifier_id))?;

        let block_hash = ticket.block_hash;
        if self.has_ticket(&block_hash, ticket.verifier_id) {
            trace!(
                round = self.round,
                verifier_id = ticket.verifier_id,
                block_hash = hex::encode(&block_hash.as_bytes()[..8]),
                "Ignoring duplicate ticket"
            );
            return Ok(TicketOutcome {
                accepted: false,
                quorum_reached: self.has_quorum_for(&block_hash, participants, rule),
            });
        }

        if !ticket.verify(&verifier.signing_key, domain) {
            warn!(
                round = self.round,
                verifier_id = ticket.verifier_id,
                "Invalid ticket signature"
            );
            return Err(TicketError::InvalidSignature(ticket.verifier_id));
        }

        let weight = rule.weight_of(verifier);
        trace!(
            round = self.round,
            verifier_id = ticket.verifier_id,
            block_hash = hex::encode(&block_hash.as_bytes()[..8]),
            weight = weight,
            "Adding ticket"
        );

        self.tickets
            .entry(block_hash)
            .or_default()
            .insert(ticket.verifier_id, ticket);
        let total = self.weight_by_hash.entry(block_hash).or_default();
        *total += weight;
        let total = *total;

        let quorum_reached = rule.is_reached(total, participants);
        if quorum_reached {
            debug!(
                round = self.round,
                block_hash = hex::encode(&block_hash.as_bytes()[..8]),
                weight = total,
                quorum = rule.threshold(participants),
                rule = rule.name(),
                "Ticket quorum reached"
            );
        }

        Ok(TicketOutcome {
            accepted: true,
            quorum_reached,
        })
    }

    /// Whether `verifier` has a counted ticket for `block_hash`
    pub fn has_ticket(&self, block_hash: &H256, verifier: PartyId) -> bool {
        self.tickets
            .get(block_hash)
            .map(|by_verifier| by_verifier.contains_key(&verifier))
            .unwrap_or(false)
    }

    /// Number of distinct tickets for `block_hash`
    pub fn count_for(&self, block_hash: &H256) -> usize {
        self.tickets.get(block_hash).map(BTreeMap::len).unwrap_or(0)
    }

    /// Accumulated quorum weight for `block_hash`
    pub fn weight_for(&self, block_hash: &H256) -> u64 {
        self.weight_by_hash.get(block_hash).copied().unwrap_or(0)
    }

    /// Check if `block_hash` has reached quorum
    pub fn has_quorum_for(
        &self,
        block_hash: &H256,
        participants: &ParticipantSet,
        rule: &dyn QuorumRule,
    ) -> bool {
        rule.is_reached(self.weight_for(block_hash), participants)
    }

    /// First block hash (in hash order) that has reached quorum
    pub fn quorum_block(&self, participants: &ParticipantSet, rule: &dyn QuorumRule) -> Option<H256> {
        let mut reached: Vec<H256> = self
            .weight_by_hash
            .iter()
            .filter(|(_, weight)| rule.is_reached(**weight, participants))
            .map(|(hash, _)| *hash)
            .collect();
        reached.sort();
        reached.into_iter().next()
    }

    /// Notarization for `block_hash` from the tickets collected so far
    pub fn notarization_for(&self, block_hash: &H256) -> Option<Notarization> {
        let tickets = self.tickets.get(block_hash)?;
        Some(Notarization {
            block_hash: *block_hash,
            round: self.round,
            tickets: tickets.values().cloned().collect(),
        })
    }

    /// Block hashes with at least one ticket
    pub fn block_hashes(&self) -> Vec<H256> {
        let mut hashes: Vec<H256> = self.tickets.keys().copied().collect();
        hashes.sort();
        hashes
    }

    /// Check that a received notarization carries valid tickets reaching quorum.
    ///
    /// Tickets for another block are rejected; duplicates are ignored.
    pub fn verify_notarization(
        notarization: &Notarization,
        participants: &ParticipantSet,
        rule: &dyn QuorumRule,
        domain: &DomainTag,
    ) -> Result<bool, TicketError> {
        let mut set = TicketSet::new(notarization.round);
        for ticket in &notarization.tickets {
            if ticket.block_hash != notarization.block_hash {
                return Err(TicketError::InvalidSignature(ticket.verifier_id));
            }
            set.add_ticket(ticket.clone(), participants, rule, domain)?;
        }
        Ok(set.has_quorum_for(&notarization.block_hash, participants, rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::CountQuorum;
    use crate::types::{Domains, Participant};
    use roundchain_crypto::BlsPrivateKey;

    fn setup(n: u64) -> (ParticipantSet, Vec<BlsPrivateKey>, Domains) {
        let keys: Vec<BlsPrivateKey> = (0..n).map(|_| BlsPrivateKey::random()).collect();
        let participants = ParticipantSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| Participant::new(i as u64, k.public_key(), 1))
                .collect(),
        )
        .unwrap();
        (participants, keys, Domains::new("test"))
    }

    #[test]
    fn test_wrong_round_rejected() {
        let (participants, keys, domains) = setup(4);
        let mut set = TicketSet::new(5);
        let ticket = VerificationTicket::sign(H256::keccak256(b"b"), 6, 0, &keys[0], &domains.ticket);
        let result = set.add_ticket(ticket, &participants, &CountQuorum::default(), &domains.ticket);
        assert!(matches!(result, Err(TicketError::WrongRound { .. })));
    }

    #[test]
    fn test_tickets_for_other_blocks_do_not_mix() {
        let (participants, keys, domains) = setup(4);
        let rule = CountQuorum::default();
        let mut set = TicketSet::new(1);
        let a = H256::keccak256(b"a");
        let b = H256::keccak256(b"b");

        for (i, key) in keys.iter().enumerate().take(2) {
            let ticket = VerificationTicket::sign(a, 1, i as u64, key, &domains.ticket);
            set.add_ticket(ticket, &participants, &rule, &domains.ticket).unwrap();
        }
        let ticket = VerificationTicket::sign(b, 1, 2, &keys[2], &domains.ticket);
        let outcome = set.add_ticket(ticket, &participants, &rule, &domains.ticket).unwrap();

        assert!(outcome.accepted);
        assert!(!outcome.quorum_reached);
        assert_eq!(set.count_for(&a), 2);
        assert_eq!(set.count_for(&b), 1);
        assert_eq!(set.quorum_block(&participants, &rule), None);
    }

    #[test]
    fn test_verify_notarization_rejects_mixed_hashes() {
        let (participants, keys, domains) = setup(4);
        let rule = CountQuorum::default();
        let a = H256::keccak256(b"a");
        let tickets = vec![
            VerificationTicket::sign(a, 1, 0, &keys[0], &domains.ticket),
            VerificationTicket::sign(H256::keccak256(b"b"), 1, 1, &keys[1], &domains.ticket),
        ];
        let notarization = Notarization {
            block_hash: a,
            round: 1,
            tickets,
        };
        assert!(TicketSet::verify_notarization(&notarization, &participants, &rule, &domains.ticket).is_err());
    }
}
