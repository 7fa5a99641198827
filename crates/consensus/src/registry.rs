//! The round registry.
//!
//! Owns the map from round number to [`Round`]. Creation is idempotent under the
//! registry lock, so a round is never duplicated no matter how many tasks reference
//! it concurrently. Lock order: registry, then round.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use roundchain_types::{Block, RoundNumber, H256};
use tracing::{debug, trace};

use crate::error::{ConsensusError, ConsensusResult};
use crate::round::Round;

/// Rounds known to this node
#[derive(Debug)]
pub struct RoundRegistry {
    rounds: Mutex<BTreeMap<RoundNumber, Arc<Round>>>,
    finalized: AtomicU64,
}

impl RoundRegistry {
    /// Create a registry holding the finalized genesis round
    pub fn new(genesis: Block) -> Self {
        let mut rounds = BTreeMap::new();
        rounds.insert(0, Arc::new(Round::genesis(genesis)));
        Self {
            rounds: Mutex::new(rounds),
            finalized: AtomicU64::new(0),
        }
    }

    /// Look up a round
    pub fn get(&self, round: RoundNumber) -> Option<Arc<Round>> {
        self.rounds.lock().get(&round).cloned()
    }

    /// Whether `round` exists
    pub fn contains(&self, round: RoundNumber) -> bool {
        self.rounds.lock().contains_key(&round)
    }

    /// Return `round`, creating it with `previous_output` if absent.
    ///
    /// The flag is `true` when this call created the round.
    pub fn get_or_create(
        &self,
        round: RoundNumber,
        previous_output: H256,
    ) -> (Arc<Round>, bool) {
        let mut rounds = self.rounds.lock();
        if let Some(existing) = rounds.get(&round) {
            return (Arc::clone(existing), false);
        }
        let created = Arc::new(Round::new(round, previous_output));
        rounds.insert(round, Arc::clone(&created));
        trace!(round, "Created round");
        (created, true)
    }

    /// Return `round`, creating it from its predecessor's beacon output.
    ///
    /// Fails with [`ConsensusError::RoundNotFound`] when the predecessor is unknown and
    /// [`ConsensusError::RoundNotReady`] when its beacon has not completed.
    pub fn advance(&self, round: RoundNumber) -> ConsensusResult<Arc<Round>> {
        let mut rounds = self.rounds.lock();
        if let Some(existing) = rounds.get(&round) {
            return Ok(Arc::clone(existing));
        }
        let predecessor_number = round
            .checked_sub(1)
            .ok_or(ConsensusError::RoundNotFound(round))?;
        let predecessor = rounds
            .get(&predecessor_number)
            .ok_or(ConsensusError::RoundNotFound(predecessor_number))?;

        let previous_output = {
            let state = predecessor.lock();
            state
                .beacon()
                .output()
                .ok_or(ConsensusError::RoundNotReady {
                    round: predecessor_number,
                    phase: state.phase(),
                })?
        };

        let created = Arc::new(Round::new(round, previous_output));
        rounds.insert(round, Arc::clone(&created));
        debug!(round, "Advanced round table");
        Ok(created)
    }

    /// Drop `round + 1` unless it is notarized or chained to `output`.
    ///
    /// A successor created from a beacon output its predecessor no longer holds
    /// would never seed. Returns whether a round was dropped.
    pub fn discard_stale_successor(&self, round: RoundNumber, output: Option<&H256>) -> bool {
        let successor = round + 1;
        let mut rounds = self.rounds.lock();
        let stale = rounds
            .get(&successor)
            .map(|next| Some(next.previous_output()) != output && !next.phase().is_notarized())
            .unwrap_or(false);
        if !stale {
            return false;
        }
        if let Some(next) = rounds.remove(&successor) {
            if let Some(handle) = next.lock().verification.take() {
                handle.abort();
            }
        }
        debug!(round = successor, "Discarded stale successor round");
        true
    }

    /// Drop every round below `round`, keeping the finalized head. Returns the count removed.
    pub fn drop_below(&self, round: RoundNumber) -> usize {
        let keep_from = round.min(self.finalized_round());
        let mut rounds = self.rounds.lock();
        let kept = rounds.split_off(&keep_from);
        let removed = rounds.len();
        *rounds = kept;
        if removed > 0 {
            debug!(below = keep_from, removed, "Pruned rounds");
        }
        removed
    }

    /// Highest finalized round
    pub fn finalized_round(&self) -> RoundNumber {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Record `round` as finalized; the value only grows.
    pub fn set_finalized(&self, round: RoundNumber) {
        self.finalized.fetch_max(round, Ordering::SeqCst);
    }

    /// Highest round known
    pub fn latest_round(&self) -> RoundNumber {
        self.rounds.lock().keys().next_back().copied().unwrap_or(0)
    }

    /// Lowest round still held
    pub fn oldest_round(&self) -> RoundNumber {
        self.rounds.lock().keys().next().copied().unwrap_or(0)
    }

    /// Number of rounds held
    pub fn len(&self) -> usize {
        self.rounds.lock().len()
    }

    /// Whether no rounds are held
    pub fn is_empty(&self) -> bool {
        self.rounds.lock().is_empty()
    }
}
