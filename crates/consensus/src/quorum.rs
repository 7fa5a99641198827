//! Quorum rules for notarization.
//!
//! A block is notarized once the weight of its distinct valid tickets reaches
//! `ceil(numerator / denominator * total)`. [`CountQuorum`] weighs every participant
//! as one, [`StakeQuorum`] by stake.

use std::fmt::Debug;

use crate::types::{Participant, ParticipantSet};

/// Decides how much a ticket weighs and how much weight notarizes a block
pub trait QuorumRule: Debug + Send + Sync {
    /// Weight contributed by one participant's ticket
    fn weight_of(&self, participant: &Participant) -> u64;

    /// Weight needed to reach quorum
    fn threshold(&self, participants: &ParticipantSet) -> u64;

    /// Whether `weight` reaches quorum
    fn is_reached(&self, weight: u64, participants: &ParticipantSet) -> bool {
        weight >= self.threshold(participants)
    }

    /// Rule name for logging
    fn name(&self) -> &'static str;
}

/// `ceil(total * numerator / denominator)`, at least 1
fn ceil_fraction(total: u64, numerator: u64, denominator: u64) -> u64 {
    let denominator = u128::from(denominator.max(1));
    let scaled = u128::from(total) * u128::from(numerator);
    let needed = (scaled + denominator - 1) / denominator;
    u64::try_from(needed).unwrap_or(u64::MAX).max(1)
}

/// Counts distinct tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountQuorum {
    numerator: u64,
    denominator: u64,
}

impl CountQuorum {
    /// Quorum at `numerator / denominator` of the participant count
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl Default for CountQuorum {
    fn default() -> Self {
        Self::new(2, 3)
    }
}

impl QuorumRule for CountQuorum {
    fn weight_of(&self, _participant: &Participant) -> u64 {
        1
    }

    fn threshold(&self, participants: &ParticipantSet) -> u64 {
        ceil_fraction(participants.len() as u64, self.numerator, self.denominator)
    }

    fn name(&self) -> &'static str {
        "count"
    }
}

/// Sums the stake of distinct ticket signers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeQuorum {
    numerator: u64,
    denominator: u64,
}

impl StakeQuorum {
    /// Quorum at `numerator / denominator` of the total stake
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl Default for StakeQuorum {
    fn default() -> Self {
        Self::new(2, 3)
    }
}

impl QuorumRule for StakeQuorum {
    fn weight_of(&self, participant: &Participant) -> u64 {
        participant.stake
    }

    fn threshold(&self, participants: &ParticipantSet) -> u64 {
        ceil_fraction(participants.total_stake(), self.numerator, self.denominator)
    }

    fn name(&self) -> &'static str {
        "stake"
    }
}
