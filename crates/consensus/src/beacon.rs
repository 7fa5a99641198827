//! Threshold random beacon.
//!
//! The beacon message of round `r` is `r_le || previous_output`. Each party signs it
//! with its group share; any `t` partial signatures recover the same group
//! signature, and the round's output is the Keccak256 hash of that signature.
//!
//! A restarted round appends its restart count as `u32_le`, so every restart draws
//! a fresh seed and with it a fresh rank table.

use std::collections::BTreeMap;
use std::sync::Arc;

use roundchain_crypto::{keccak256, recover_signature, BlsSignature, DomainTag};
use roundchain_types::{PartyId, RoundNumber, H256};
use tracing::{debug, trace, warn};

use crate::dkg::ThresholdIdentity;
use crate::types::share_index;

const GENESIS_BEACON_DOMAIN: &[u8] = b"ROUNDCHAIN_GENESIS_BEACON";

/// Error types for beacon operations
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    /// Share from a party without a public key share
    #[error("unknown beacon party {0}")]
    UnknownParty(PartyId),

    /// Partial signature does not verify under the party's public share
    #[error("invalid beacon share from party {party} for round {round}")]
    InvalidShare { party: PartyId, round: RoundNumber },

    /// Fewer than `t` shares collected
    #[error("insufficient beacon shares: have {have}, need {need}")]
    Insufficient { have: usize, need: usize },

    /// Recovered signature does not verify under the group key
    #[error("recovered beacon signature for round {0} is invalid")]
    RecoveryFailed(RoundNumber),

    /// Threshold arithmetic failed
    #[error("beacon crypto error: {0}")]
    Crypto(String),
}

/// Beacon shares collected for one round
#[derive(Debug, Clone)]
pub struct BeaconShares {
    round: RoundNumber,
    restarts: u32,
    previous_output: H256,
    shares: BTreeMap<PartyId, BlsSignature>,
    output: Option<H256>,
}

impl BeaconShares {
    /// Empty share set for `round` chained to `previous_output`
    pub fn new(round: RoundNumber, previous_output: H256) -> Self {
        Self::restarted(round, previous_output, 0)
    }

    /// Empty share set for the `restarts`-th restart of `round`
    pub fn restarted(round: RoundNumber, previous_output: H256, restarts: u32) -> Self {
        Self {
            round,
            restarts,
            previous_output,
            shares: BTreeMap::new(),
            output: None,
        }
    }

    /// A share set whose output is already known
    pub fn completed(round: RoundNumber, previous_output: H256, output: H256) -> Self {
        Self {
            round,
            restarts: 0,
            previous_output,
            shares: BTreeMap::new(),
            output: Some(output),
        }
    }

    /// Round
    pub fn round(&self) -> RoundNumber {
        self.round
    }

    /// Restart count the shares are signed under
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Output of the previous round
    pub fn previous_output(&self) -> &H256 {
        &self.previous_output
    }

    /// Number of pending shares
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether no shares are pending
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Whether `party` contributed a pending share
    pub fn contains(&self, party: PartyId) -> bool {
        self.shares.contains_key(&party)
    }

    /// Recovered output, once computed
    pub fn output(&self) -> Option<H256> {
        self.output
    }

    /// Set the output directly and discard pending shares.
    pub(crate) fn adopt(&mut self, output: H256) {
        if self.output.is_none() {
            self.output = Some(output);
        }
        self.shares.clear();
    }

    /// Replace the output with one a notarization vouches for.
    pub(crate) fn force_output(&mut self, output: H256) {
        self.output = Some(output);
        self.shares.clear();
    }
}

/// Signs, verifies and recovers beacon shares for one threshold identity
#[derive(Debug, Clone)]
pub struct RandomBeacon {
    identity: Arc<ThresholdIdentity>,
    domain: DomainTag,
    verify_shares: bool,
}

impl RandomBeacon {
    /// Create a beacon.
    pub fn new(identity: Arc<ThresholdIdentity>, domain: DomainTag, verify_shares: bool) -> Self {
        Self {
            identity,
            domain,
            verify_shares,
        }
    }

    /// Output chaining into round 1
    pub fn genesis_output(chain_id: &str) -> H256 {
        H256::new(roundchain_crypto::keccak256_concat(&[
            GENESIS_BEACON_DOMAIN,
            chain_id.as_bytes(),
        ]))
    }

    /// Message signed for `round` after `restarts` restarts
    pub fn beacon_message(round: RoundNumber, restarts: u32, previous_output: &H256) -> Vec<u8> {
        let mut message = Vec::with_capacity(44);
        message.extend_from_slice(&round.to_le_bytes());
        message.extend_from_slice(previous_output.as_bytes());
        if restarts > 0 {
            message.extend_from_slice(&restarts.to_le_bytes());
        }
        message
    }

    /// Shares needed to recover
    pub fn threshold(&self) -> usize {
        self.identity.threshold()
    }

    /// This party's partial signature for `round`.
    pub fn sign_share(&self, round: RoundNumber, restarts: u32, previous_output: &H256) -> BlsSignature {
        self.identity
            .sign(&Self::beacon_message(round, restarts, previous_output), &self.domain)
    }

    /// Check a partial signature against the signer's public key share.
    pub fn verify_share(
        &self,
        round: RoundNumber,
        restarts: u32,
        previous_output: &H256,
        party: PartyId,
        signature: &BlsSignature,
    ) -> Result<(), BeaconError> {
        let public_share = self
            .identity
            .public_share(party)
            .ok_or(BeaconError::UnknownParty(party))?;
        let message = Self::beacon_message(round, restarts, previous_output);
        if !signature.verify_with_domain(&message, public_share, &self.domain) {
            return Err(BeaconError::InvalidShare { party, round });
        }
        Ok(())
    }

    /// Store a share. Returns `true` when this share makes the set reach `t`.
    ///
    /// Repeated shares and shares for a completed round are ignored.
    pub fn add_share(
        &self,
        shares: &mut BeaconShares,
        party: PartyId,
        signature: BlsSignature,
    ) -> Result<bool, BeaconError> {
        if shares.output.is_some() || shares.shares.contains_key(&party) {
            return Ok(false);
        }
        if self.verify_shares {
            if let Err(e) =
                self.verify_share(shares.round, shares.restarts, &shares.previous_output, party, &signature)
            {
                warn!(round = shares.round, party, "Rejected beacon share: {}", e);
                return Err(e);
            }
        } else if self.identity.public_share(party).is_none() {
            return Err(BeaconError::UnknownParty(party));
        }

        shares.shares.insert(party, signature);
        trace!(
            round = shares.round,
            party,
            have = shares.shares.len(),
            need = self.threshold(),
            "Added beacon share"
        );
        Ok(shares.shares.len() == self.threshold())
    }

    /// Recover the round's output. Computed once; later calls return the latched value.
    ///
    /// Uses the `t` lowest-id shares, so the result does not depend on arrival order.
    pub fn recover(&self, shares: &mut BeaconShares) -> Result<H256, BeaconError> {
        if let Some(output) = shares.output {
            return Ok(output);
        }
        let need = self.threshold();
        if shares.shares.len() < need {
            return Err(BeaconError::Insufficient {
                have: shares.shares.len(),
                need,
            });
        }

        let partials: Vec<_> = shares
            .shares
            .iter()
            .take(need)
            .map(|(party, sig)| (share_index(*party), sig.clone()))
            .collect();
        let signature =
            recover_signature(&partials).map_err(|e| BeaconError::Crypto(e.to_string()))?;

        let message = Self::beacon_message(shares.round, shares.restarts, &shares.previous_output);
        if !signature.verify_with_domain(&message, self.identity.group_public_key(), &self.domain) {
            // Only reachable with share verification disabled.
            return Err(BeaconError::RecoveryFailed(shares.round));
        }

        let output = H256::new(keccak256(&signature.to_bytes()));
        debug!(round = shares.round, output = %output.short(), "Recovered beacon output");
        shares.adopt(output);
        Ok(output)
    }
}
