//! Per-round state.
//!
//! A [`Round`] holds its number and the previous beacon output as immutable data;
//! everything that changes while the round runs sits behind the round's own lock,
//! so unrelated rounds never contend.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use roundchain_crypto::BlsSignature;
use roundchain_types::{Block, PartyId, RoundNumber, H256};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::beacon::BeaconShares;
use crate::rank::RankTable;
use crate::ticket_set::TicketSet;
use crate::types::{Notarization, VerificationTicket};

/// Lifecycle of a round. Phases only move forward; a restart is the one exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    /// Round object exists, no beacon shares yet
    Created,
    /// Collecting beacon shares
    BeaconPending,
    /// Seed known, rank table computed
    BeaconComplete,
    /// Accepting proposals and tickets
    Verifying,
    /// A block reached ticket quorum
    Notarized,
    /// Block is permanent; transient state released
    Finalized,
}

impl RoundPhase {
    /// Check if a transition to `target` is allowed.
    ///
    /// Forward moves may skip phases, except that `Finalized` is only reachable
    /// from `Notarized`.
    pub fn can_transition_to(&self, target: RoundPhase) -> bool {
        match target {
            RoundPhase::Finalized => matches!(self, RoundPhase::Notarized),
            _ => target > *self,
        }
    }

    /// Whether the seed is known
    pub fn has_seed(&self) -> bool {
        *self >= RoundPhase::BeaconComplete
    }

    /// Whether a block was notarized
    pub fn is_notarized(&self) -> bool {
        *self >= RoundPhase::Notarized
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Created => "CREATED",
            RoundPhase::BeaconPending => "BEACON_PENDING",
            RoundPhase::BeaconComplete => "BEACON_COMPLETE",
            RoundPhase::Verifying => "VERIFYING",
            RoundPhase::Notarized => "NOTARIZED",
            RoundPhase::Finalized => "FINALIZED",
        };
        write!(f, "{}", name)
    }
}

/// Mutable state of one round
#[derive(Debug)]
pub struct RoundState {
    pub(crate) phase: RoundPhase,
    pub(crate) beacon: BeaconShares,
    pub(crate) seed: Option<H256>,
    pub(crate) rank_table: Option<RankTable>,
    pub(crate) proposals: BTreeMap<H256, Block>,
    pub(crate) rejected: HashSet<H256>,
    pub(crate) tickets: TicketSet,
    pub(crate) notarized: Option<Block>,
    pub(crate) notarization: Option<Notarization>,
    pub(crate) pending_notarization: Option<Notarization>,
    pub(crate) own_share: Option<BlsSignature>,
    pub(crate) own_proposal: Option<Block>,
    pub(crate) own_tickets: Vec<(VerificationTicket, PartyId)>,
    pub(crate) ticket_sent: Option<H256>,
    pub(crate) requested: HashSet<H256>,
    pub(crate) verification: Option<JoinHandle<()>>,
    pub(crate) verifier_running: bool,
    pub(crate) proposing: bool,
    pub(crate) started: bool,
    pub(crate) soft_timeouts: u32,
}

impl RoundState {
    fn new(number: RoundNumber, previous_output: H256) -> Self {
        Self {
            phase: RoundPhase::Created,
            beacon: BeaconShares::new(number, previous_output),
            seed: None,
            rank_table: None,
            proposals: BTreeMap::new(),
            rejected: HashSet::new(),
            tickets: TicketSet::new(number),
            notarized: None,
            notarization: None,
            pending_notarization: None,
            own_share: None,
            own_proposal: None,
            own_tickets: Vec::new(),
            ticket_sent: None,
            requested: HashSet::new(),
            verification: None,
            verifier_running: false,
            proposing: false,
            started: false,
            soft_timeouts: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Move to `target` if allowed. Returns whether the phase changed.
    pub fn advance(&mut self, target: RoundPhase) -> bool {
        if self.phase.can_transition_to(target) {
            self.phase = target;
            true
        } else {
            false
        }
    }

    /// Seed the round: record the beacon output and compute ranks.
    ///
    /// Ignored once a seed is set.
    pub(crate) fn set_seed(&mut self, seed: H256, rank_table: RankTable) {
        if self.seed.is_some() {
            return;
        }
        self.beacon.adopt(seed);
        self.seed = Some(seed);
        self.rank_table = Some(rank_table);
        self.advance(RoundPhase::BeaconComplete);
    }

    /// Record the notarized block. Only the first caller succeeds.
    pub(crate) fn try_notarize(&mut self, block: Block, notarization: Notarization) -> bool {
        if self.phase.is_notarized() || !self.phase.can_transition_to(RoundPhase::Notarized) {
            return false;
        }
        self.phase = RoundPhase::Notarized;
        self.notarized = Some(block);
        self.notarization = Some(notarization);
        self.pending_notarization = None;
        if let Some(handle) = self.verification.take() {
            handle.abort();
        }
        self.verifier_running = false;
        true
    }

    /// Give up on the current seed and collect beacon shares again under the next
    /// restart count. Everything derived from the old seed is dropped, pending
    /// notarizations excepted. Returns the new count, or `None` once notarized.
    pub(crate) fn restart(&mut self) -> Option<u32> {
        if self.phase.is_notarized() {
            return None;
        }
        let restarts = self.beacon.restarts().saturating_add(1);
        let number = self.beacon.round();
        self.beacon = BeaconShares::restarted(number, *self.beacon.previous_output(), restarts);
        self.seed = None;
        self.rank_table = None;
        self.proposals.clear();
        self.rejected.clear();
        self.tickets = TicketSet::new(number);
        self.own_share = None;
        self.own_proposal = None;
        self.own_tickets.clear();
        self.ticket_sent = None;
        self.requested.clear();
        if let Some(handle) = self.verification.take() {
            handle.abort();
        }
        self.verifier_running = false;
        self.proposing = false;
        self.soft_timeouts = 0;
        self.phase = RoundPhase::BeaconPending;
        Some(restarts)
    }

    /// Replace the seed with one carried by a notarized block.
    pub(crate) fn reseed(&mut self, seed: H256, rank_table: RankTable) {
        self.beacon.force_output(seed);
        self.seed = Some(seed);
        self.rank_table = Some(rank_table);
    }

    /// Enter the terminal phase and release transient state. Only the first caller succeeds.
    pub(crate) fn try_finalize(&mut self) -> bool {
        if !self.advance(RoundPhase::Finalized) {
            return false;
        }
        self.proposals.clear();
        self.rejected.clear();
        self.tickets = TicketSet::new(self.tickets.round());
        self.requested.clear();
        self.own_tickets.clear();
        self.own_proposal = None;
        self.own_share = None;
        if let Some(handle) = self.verification.take() {
            handle.abort();
        }
        true
    }

    /// Buffered proposals sorted by proposer rank, best first
    pub(crate) fn candidates_by_rank(&self) -> Vec<Block> {
        let mut candidates: Vec<(usize, Block)> = self
            .proposals
            .values()
            .filter(|block| !self.rejected.contains(&block.hash))
            .map(|block| {
                let rank = self
                    .rank_table
                    .as_ref()
                    .and_then(|table| table.rank_of(block.proposer_id))
                    .unwrap_or(usize::MAX);
                (rank, block.clone())
            })
            .collect();
        candidates.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.hash.cmp(&b.hash)));
        candidates.into_iter().map(|(_, block)| block).collect()
    }

    /// Beacon shares collected for this round
    pub fn beacon(&self) -> &BeaconShares {
        &self.beacon
    }

    /// Tickets collected for this round
    pub fn tickets(&self) -> &TicketSet {
        &self.tickets
    }

    /// Number of buffered proposals
    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    /// Block a ticket was issued for
    pub fn ticket_sent(&self) -> Option<H256> {
        self.ticket_sent
    }

    /// Soft timeouts fired since the round last (re)started
    pub fn soft_timeouts(&self) -> u32 {
        self.soft_timeouts
    }

    /// Times the round was restarted
    pub fn restarts(&self) -> u32 {
        self.beacon.restarts()
    }
}

/// One consensus round
pub struct Round {
    number: RoundNumber,
    previous_output: H256,
    state: Mutex<RoundState>,
}

impl Round {
    /// Create a round chained to the previous round's beacon output
    pub fn new(number: RoundNumber, previous_output: H256) -> Self {
        Self {
            number,
            previous_output,
            state: Mutex::new(RoundState::new(number, previous_output)),
        }
    }

    /// The finalized genesis round
    pub fn genesis(genesis: Block) -> Self {
        let seed = genesis.random_seed;
        let mut state = RoundState::new(0, H256::NIL);
        state.beacon = BeaconShares::completed(0, H256::NIL, seed);
        state.seed = Some(seed);
        state.notarization = Some(Notarization::genesis(&genesis));
        state.notarized = Some(genesis);
        state.phase = RoundPhase::Finalized;
        Self {
            number: 0,
            previous_output: H256::NIL,
            state: Mutex::new(state),
        }
    }

    /// Round number
    pub fn number(&self) -> RoundNumber {
        self.number
    }

    /// Beacon output of the previous round
    pub fn previous_output(&self) -> &H256 {
        &self.previous_output
    }

    /// Lock the round's mutable state. Never hold the guard across an await point.
    pub fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock()
    }

    /// Current phase
    pub fn phase(&self) -> RoundPhase {
        self.state.lock().phase
    }

    /// Round seed, once the beacon completed
    pub fn seed(&self) -> Option<H256> {
        self.state.lock().seed
    }

    /// Notarized block, if any
    pub fn notarized_block(&self) -> Option<Block> {
        self.state.lock().notarized.clone()
    }

    /// Notarization of the notarized block, if any
    pub fn notarization(&self) -> Option<Notarization> {
        self.state.lock().notarization.clone()
    }
}

impl fmt::Debug for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Round")
            .field("number", &self.number)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
