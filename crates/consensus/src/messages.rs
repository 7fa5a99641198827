//! Inter-node consensus messages.
//!
//! Transport, encoding and authentication of the sender are the transport's concern;
//! every variant carries exactly the fields the receiving component needs.

use roundchain_crypto::{BlsSignature, PublicCommitment};
use roundchain_types::{Block, PartyId, RoundNumber, H256};
use serde::{Deserialize, Serialize};

use crate::types::{Notarization, VerificationTicket};

/// Selector for a notarized-block fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchQuery {
    /// The block notarized in a round
    Round(RoundNumber),
    /// A block by hash
    Hash(H256),
}

/// Messages exchanged between consensus nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Partial threshold signature over the round's beacon message
    BeaconShare {
        /// Round
        round: RoundNumber,
        /// Signing party
        party_id: PartyId,
        /// Restart count of the round the share was signed under
        restarts: u32,
        /// Partial signature
        partial_signature: BlsSignature,
    },
    /// Point-to-point DKG secret share
    DkgShare {
        /// Dealer
        from: PartyId,
        /// Recipient
        to: PartyId,
        /// Encoded secret share
        secret_share_encoding: Vec<u8>,
    },
    /// Broadcast Feldman commitment of a dealer's polynomial
    DkgCommitment {
        /// Dealer
        from: PartyId,
        /// Coefficient commitments
        commitment: PublicCommitment,
    },
    /// A candidate block
    BlockProposal {
        /// The proposed block
        block: Block,
    },
    /// A verifier's ticket
    VerificationTicket(VerificationTicket),
    /// A quorum of tickets for one block
    Notarization(Notarization),
    /// Catch-up request
    NotarizedBlockRequest {
        /// Requesting party
        from: PartyId,
        /// Requested block
        query: FetchQuery,
    },
    /// Catch-up response
    NotarizedBlock {
        /// The notarized block
        block: Block,
        /// Its notarization
        notarization: Notarization,
    },
}

impl ConsensusMessage {
    /// Round this message belongs to. DKG traffic and fetch requests are roundless.
    pub fn round_number(&self) -> Option<RoundNumber> {
        match self {
            ConsensusMessage::BeaconShare { round, .. } => Some(*round),
            ConsensusMessage::BlockProposal { block } => Some(block.round),
            ConsensusMessage::VerificationTicket(ticket) => Some(ticket.round),
            ConsensusMessage::Notarization(notarization) => Some(notarization.round),
            ConsensusMessage::NotarizedBlock { block, .. } => Some(block.round),
            ConsensusMessage::DkgShare { .. }
            | ConsensusMessage::DkgCommitment { .. }
            | ConsensusMessage::NotarizedBlockRequest { .. } => None,
        }
    }

    /// Whether this message belongs to the key generation phase
    pub fn is_dkg(&self) -> bool {
        matches!(
            self,
            ConsensusMessage::DkgShare { .. } | ConsensusMessage::DkgCommitment { .. }
        )
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::BeaconShare { .. } => "beacon_share",
            ConsensusMessage::DkgShare { .. } => "dkg_share",
            ConsensusMessage::DkgCommitment { .. } => "dkg_commitment",
            ConsensusMessage::BlockProposal { .. } => "block_proposal",
            ConsensusMessage::VerificationTicket(_) => "verification_ticket",
            ConsensusMessage::Notarization(_) => "notarization",
            ConsensusMessage::NotarizedBlockRequest { .. } => "notarized_block_request",
            ConsensusMessage::NotarizedBlock { .. } => "notarized_block",
        }
    }
}

/// A message together with the party the transport received it from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending party
    pub from: PartyId,
    /// Payload
    pub message: ConsensusMessage,
}

impl Envelope {
    /// Wrap a message
    pub fn new(from: PartyId, message: ConsensusMessage) -> Self {
        Self { from, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundchain_crypto::BlsPrivateKey;

    #[test]
    fn test_round_number() {
        let key = BlsPrivateKey::random();
        let share = ConsensusMessage::BeaconShare {
            round: 7,
            party_id: 1,
            restarts: 0,
            partial_signature: key.sign_with_domain(b"m", &roundchain_crypto::DomainTag::new_beacon("t")),
        };
        assert_eq!(share.round_number(), Some(7));

        let request = ConsensusMessage::NotarizedBlockRequest {
            from: 2,
            query: FetchQuery::Round(3),
        };
        assert_eq!(request.round_number(), None);
        assert!(!request.is_dkg());

        let dkg = ConsensusMessage::DkgShare {
            from: 1,
            to: 2,
            secret_share_encoding: vec![0u8; 32],
        };
        assert!(dkg.is_dkg());
        assert_eq!(dkg.kind(), "dkg_share");
    }

    #[test]
    fn test_serde_roundtrip_notarization() {
        let notarization = ConsensusMessage::Notarization(Notarization {
            block_hash: H256::keccak256(b"b"),
            round: 2,
            tickets: Vec::new(),
        });
        let json = serde_json::to_string(&notarization).unwrap();
        let decoded: ConsensusMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, notarization);
    }
}
