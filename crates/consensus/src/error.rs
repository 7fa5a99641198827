//! Consensus error taxonomy.
//!
//! Validation failures reject a single message and never abort round processing.
//! [`ConsensusError::KeyInitialization`] is the only fatal condition.

use roundchain_core::{PeerError, SourceError, StateError, StorageError};
use roundchain_crypto::CryptoError;
use roundchain_types::{PartyId, RoundNumber, TxnRef, H256};

use crate::beacon::BeaconError;
use crate::dkg::DkgError;
use crate::round::RoundPhase;
use crate::ticket_set::TicketError;

/// Errors produced while processing consensus input.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Malformed or forged DKG or beacon share
    #[error("invalid share: {0}")]
    InvalidShare(String),

    /// Block seed differs from the round's beacon output
    #[error("seed mismatch in round {round}: expected {expected}, got {actual}")]
    SeedMismatch {
        round: RoundNumber,
        expected: H256,
        actual: H256,
    },

    /// Message references a different round than the one it was routed to
    #[error("round mismatch: expected {expected}, got {actual}")]
    RoundMismatch {
        expected: RoundNumber,
        actual: RoundNumber,
    },

    /// Ticket or block signature failed verification
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Transaction source yielded fewer transactions than a block needs
    #[error("insufficient transactions: {available} available, {required} required")]
    InsufficientTransactions { available: usize, required: usize },

    /// Round does not exist locally
    #[error("round {0} not found")]
    RoundNotFound(RoundNumber),

    /// Round exists but has not reached the phase the message needs
    #[error("round {round} not ready (phase {phase:?})")]
    RoundNotReady { round: RoundNumber, phase: RoundPhase },

    /// Structurally invalid block or notarization
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Block predecessor is neither notarized locally nor stored
    #[error("unknown predecessor {0}")]
    UnknownPredecessor(H256),

    /// Transaction already committed or included by an ancestor
    #[error("duplicate transaction {0}")]
    DuplicateTransaction(TxnRef),

    /// Proposal from a party outside the round's generator set
    #[error("party {party} has rank {rank} in round {round} and may not propose")]
    NotGenerator {
        party: PartyId,
        round: RoundNumber,
        rank: usize,
    },

    /// Message for a round too far behind the finalized head
    #[error("round {round} is stale (finalized head {finalized})")]
    StaleRound {
        round: RoundNumber,
        finalized: RoundNumber,
    },

    /// A collaborator (transaction source, state, store or transport) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Distributed key generation error
    #[error("DKG error: {0}")]
    Dkg(#[from] DkgError),

    /// Party id reserved for the genesis block
    #[error("party id {0} is reserved")]
    ReservedPartyId(PartyId),

    /// The local signing identity or key shares could not be initialized
    #[error("key initialization failed: {0}")]
    KeyInitialization(String),
}

impl ConsensusError {
    /// Whether the router should requeue the message that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsensusError::RoundNotFound(_)
                | ConsensusError::RoundNotReady { .. }
                | ConsensusError::Dkg(DkgError::MissingCommitment(_))
        )
    }
}

impl From<BeaconError> for ConsensusError {
    fn from(e: BeaconError) -> Self {
        ConsensusError::InvalidShare(e.to_string())
    }
}

impl From<TicketError> for ConsensusError {
    fn from(e: TicketError) -> Self {
        match e {
            TicketError::WrongRound {
                ticket_round,
                expected_round,
            } => ConsensusError::RoundMismatch {
                expected: expected_round,
                actual: ticket_round,
            },
            other => ConsensusError::InvalidSignature(other.to_string()),
        }
    }
}

impl From<CryptoError> for ConsensusError {
    fn from(e: CryptoError) -> Self {
        ConsensusError::InvalidShare(e.to_string())
    }
}

impl From<roundchain_types::Error> for ConsensusError {
    fn from(e: roundchain_types::Error) -> Self {
        ConsensusError::InvalidBlock(e.to_string())
    }
}

macro_rules! collaborator_error {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ConsensusError {
                fn from(e: $ty) -> Self {
                    ConsensusError::Collaborator(e.to_string())
                }
            }
        )*
    };
}

collaborator_error!(PeerError, SourceError, StateError, StorageError);

/// Result type for consensus operations
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
