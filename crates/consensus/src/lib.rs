//! # Roundchain Consensus
//!
//! Round-based consensus for a permissioned chain with a fixed set of participants.
//!
//! A threshold BLS random beacon seeds every round. The seed ranks the participants;
//! the best-ranked parties propose, everyone verifies the best valid proposal and
//! signs a verification ticket for it, and a quorum of tickets notarizes the block.
//! Finalization trails notarization by one round.
//!
//! ## Round Flow
//!
//! ```text
//! Round r:
//!
//! ┌──────────────┐
//! │    BEACON    │  once r-1 is notarized:
//! │              │      broadcast BeaconShare{r, sign_share(r || output(r-1))}
//! │              │  ON t shares: seed(r) = keccak(recover(shares))
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │     RANK     │  rank(p) = position of sha256(seed || p) among participants
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   PROPOSE    │  IF rank(self) < num_generators:
//! │              │      broadcast BlockProposal{r, prev = notarized(r-1), seed, txns}
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    VERIFY    │  after the collection window, best rank first:
//! │              │      first valid block -> broadcast VerificationTicket (once)
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   NOTARIZE   │  ON quorum of tickets for one block:
//! │              │      broadcast Notarization, start r+1, finalize up to r-1
//! └──────────────┘
//! ```
//!
//! Keys come from a distributed key generation run once before round 1
//! ([`dkg::run_dkg`]), or from a trusted dealer in tests.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod beacon;
pub mod dkg;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod messages;
pub mod proposer;
pub mod quorum;
pub mod rank;
pub mod registry;
pub mod retry;
pub mod round;
pub mod router;
pub mod ticket_set;
pub mod types;
pub mod verifier;

pub use beacon::{BeaconError, BeaconShares, RandomBeacon};
pub use dkg::{run_dkg, DkgConfig, DkgError, DkgOutcome, DkgResponder, DkgSession, ThresholdIdentity};
pub use engine::{Collaborators, ConsensusEngine, EngineConfig, TicketDelivery};
pub use error::{ConsensusError, ConsensusResult};
pub use messages::{ConsensusMessage, Envelope, FetchQuery};
pub use quorum::{CountQuorum, QuorumRule, StakeQuorum};
pub use rank::RankTable;
pub use registry::RoundRegistry;
pub use retry::{BackoffMode, RetryConfig, RetryError, RetryScheduler};
pub use round::{Round, RoundPhase, RoundState};
pub use router::{MessageRouter, RouteOutcome};
pub use ticket_set::{TicketError, TicketOutcome, TicketSet};
pub use types::{share_index, Domains, Notarization, Participant, ParticipantSet, VerificationTicket};
