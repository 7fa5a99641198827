//! Distributed key generation.
//!
//! Every party samples a secret polynomial of degree `t - 1`, broadcasts a Feldman
//! commitment to its coefficients and sends each other party the polynomial's value
//! at that party's index. A party's group secret share is the sum of the values it
//! received; the group public key is the sum of the commitments' constant terms.
//!
//! [`run_dkg`] drives one session over the network: it waits in bounded slices,
//! re-sending its own contribution after each incomplete slice, and gives up with
//! [`ConsensusError::KeyInitialization`] once the slices are exhausted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use rand::RngCore;
use roundchain_core::PeerSet;
use roundchain_crypto::{
    BlsPrivateKey, BlsPublicKey, BlsSignature, CryptoError, DealtKeys, DomainTag, PublicCommitment,
    SecretPolynomial, SecretShare,
};
use roundchain_types::PartyId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::messages::{ConsensusMessage, Envelope};
use crate::types::{share_index, ParticipantSet};

/// Error types for key generation
#[derive(Debug, thiserror::Error)]
pub enum DkgError {
    /// Sender is not a participant
    #[error("unknown party {0}")]
    UnknownParty(PartyId),

    /// Share failed to decode or does not match its dealer's commitment
    #[error("invalid share from party {from}: {reason}")]
    InvalidShare { from: PartyId, reason: String },

    /// Share arrived before its dealer's commitment
    #[error("no commitment from party {0} yet")]
    MissingCommitment(PartyId),

    /// Commitment degree differs from the session threshold
    #[error("commitment from party {from} has threshold {actual}, expected {expected}")]
    ThresholdMismatch {
        from: PartyId,
        expected: usize,
        actual: usize,
    },

    /// Aggregation attempted before enough shares arrived
    #[error("DKG incomplete: {received} of {required} contributions")]
    Incomplete { received: usize, required: usize },

    /// Aggregation attempted twice
    #[error("DKG shares already aggregated")]
    AlreadyAggregated,

    /// Underlying threshold arithmetic failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Key generation parameters
#[derive(Debug, Clone)]
pub struct DkgConfig {
    /// Shares needed to sign for the group
    pub threshold: usize,
    /// Wait for all `n` contributions; otherwise `threshold` suffice
    pub require_all_shares: bool,
    /// Check shares against their dealer's commitment
    pub verify_shares: bool,
    /// Length of one wait slice before re-sending
    pub rebroadcast_interval: Duration,
    /// Number of wait slices before giving up
    pub max_rebroadcasts: u32,
}

impl DkgConfig {
    /// Parameters with the given threshold and default timing
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            require_all_shares: true,
            verify_shares: true,
            rebroadcast_interval: Duration::from_millis(1000),
            max_rebroadcasts: 10,
        }
    }
}

/// A node's long-lived threshold signing identity.
///
/// Immutable once built; re-keying builds a new one.
#[derive(Clone)]
pub struct ThresholdIdentity {
    party_id: PartyId,
    threshold: usize,
    group_public_key: BlsPublicKey,
    signing_key: BlsPrivateKey,
    public_shares: BTreeMap<PartyId, BlsPublicKey>,
}

impl ThresholdIdentity {
    /// Build an identity from a group secret share and the group commitment.
    pub fn from_parts(
        party_id: PartyId,
        secret_share: &SecretShare,
        group_commitment: &PublicCommitment,
        participants: &ParticipantSet,
    ) -> Result<Self, DkgError> {
        if !participants.contains(party_id) {
            return Err(DkgError::UnknownParty(party_id));
        }
        if !secret_share.verify(group_commitment, share_index(party_id)) {
            return Err(DkgError::InvalidShare {
                from: party_id,
                reason: "group share does not match the group commitment".into(),
            });
        }

        let public_shares = participants
            .ids()
            .map(|id| {
                group_commitment
                    .public_key_share(share_index(id))
                    .map(|pk| (id, pk))
            })
            .collect::<Result<BTreeMap<_, _>, CryptoError>>()?;

        Ok(Self {
            party_id,
            threshold: group_commitment.threshold(),
            group_public_key: group_commitment.group_public_key()?,
            signing_key: secret_share.signing_key()?,
            public_shares,
        })
    }

    /// Build an identity from trusted-dealer output.
    pub fn from_dealt(
        party_id: PartyId,
        dealt: &DealtKeys,
        participants: &ParticipantSet,
    ) -> Result<Self, DkgError> {
        let index = share_index(party_id);
        let share = dealt
            .shares
            .iter()
            .find(|(x, _)| *x == index)
            .map(|(_, share)| share)
            .ok_or(DkgError::UnknownParty(party_id))?;
        Self::from_parts(party_id, share, &dealt.commitment, participants)
    }

    /// Owning party
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    /// Shares needed to recover a group signature
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The group public key
    pub fn group_public_key(&self) -> &BlsPublicKey {
        &self.group_public_key
    }

    /// Public key share of `party`
    pub fn public_share(&self, party: PartyId) -> Option<&BlsPublicKey> {
        self.public_shares.get(&party)
    }

    /// Partial signature with this party's group share
    pub fn sign(&self, message: &[u8], domain: &DomainTag) -> BlsSignature {
        self.signing_key.sign_with_domain(message, domain)
    }
}

impl fmt::Debug for ThresholdIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdIdentity")
            .field("party_id", &self.party_id)
            .field("threshold", &self.threshold)
            .field("group_public_key", &self.group_public_key)
            .finish_non_exhaustive()
    }
}

/// One party's view of a key generation run
pub struct DkgSession {
    party_id: PartyId,
    parties: Vec<PartyId>,
    participants: ParticipantSet,
    config: DkgConfig,
    polynomial: SecretPolynomial,
    commitment: PublicCommitment,
    commitments: BTreeMap<PartyId, PublicCommitment>,
    received: BTreeMap<PartyId, SecretShare>,
    aggregated: bool,
}

impl DkgSession {
    /// Start a session, sampling this party's polynomial from `rng`.
    pub fn new(
        party_id: PartyId,
        participants: &ParticipantSet,
        config: DkgConfig,
        rng: &mut impl RngCore,
    ) -> Result<Self, DkgError> {
        if !participants.contains(party_id) {
            return Err(DkgError::UnknownParty(party_id));
        }
        if config.threshold == 0 || config.threshold > participants.len() {
            return Err(DkgError::Crypto(CryptoError::InvalidThreshold {
                threshold: config.threshold,
                parties: participants.len(),
            }));
        }

        let polynomial = SecretPolynomial::random(config.threshold, rng)?;
        let commitment = polynomial.commitment();
        let own_share = polynomial.evaluate(share_index(party_id))?;

        let mut commitments = BTreeMap::new();
        commitments.insert(party_id, commitment.clone());
        let mut received = BTreeMap::new();
        received.insert(party_id, own_share);

        Ok(Self {
            party_id,
            parties: participants.ids().collect(),
            participants: participants.clone(),
            config,
            polynomial,
            commitment,
            commitments,
            received,
            aggregated: false,
        })
    }

    /// Owning party
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    /// Session parameters
    pub fn config(&self) -> &DkgConfig {
        &self.config
    }

    /// This party's contribution for `party`
    pub fn compute_share_for(&self, party: PartyId) -> Result<SecretShare, DkgError> {
        if !self.participants.contains(party) {
            return Err(DkgError::UnknownParty(party));
        }
        Ok(self.polynomial.evaluate(share_index(party))?)
    }

    /// Commitment to this party's polynomial
    pub fn commitment(&self) -> &PublicCommitment {
        &self.commitment
    }

    /// Record a dealer's commitment. Returns `false` for a repeat.
    pub fn receive_commitment(
        &mut self,
        from: PartyId,
        commitment: PublicCommitment,
    ) -> Result<bool, DkgError> {
        if !self.participants.contains(from) {
            return Err(DkgError::UnknownParty(from));
        }
        if commitment.threshold() != self.config.threshold {
            return Err(DkgError::ThresholdMismatch {
                from,
                expected: self.config.threshold,
                actual: commitment.threshold(),
            });
        }
        if self.commitments.contains_key(&from) {
            return Ok(false);
        }
        debug!(party_id = self.party_id, from, "Received DKG commitment");
        self.commitments.insert(from, commitment);
        Ok(true)
    }

    /// Record the share dealt to this party by `from`.
    ///
    /// Returns `false` when a share from `from` was already stored.
    pub fn receive_share(&mut self, from: PartyId, encoding: &[u8]) -> Result<bool, DkgError> {
        if !self.participants.contains(from) {
            return Err(DkgError::UnknownParty(from));
        }
        if self.received.contains_key(&from) {
            return Ok(false);
        }

        let share = SecretShare::from_bytes(encoding).map_err(|e| DkgError::InvalidShare {
            from,
            reason: e.to_string(),
        })?;

        if self.config.verify_shares {
            let commitment = self
                .commitments
                .get(&from)
                .ok_or(DkgError::MissingCommitment(from))?;
            if !share.verify(commitment, share_index(self.party_id)) {
                warn!(party_id = self.party_id, from, "DKG share does not match commitment");
                return Err(DkgError::InvalidShare {
                    from,
                    reason: "share does not match commitment".into(),
                });
            }
        }

        debug!(party_id = self.party_id, from, "Received DKG share");
        self.received.insert(from, share);
        Ok(true)
    }

    fn qualified(&self) -> Vec<PartyId> {
        self.received
            .keys()
            .filter(|id| self.commitments.contains_key(id))
            .copied()
            .collect()
    }

    fn required(&self) -> usize {
        if self.config.require_all_shares {
            self.parties.len()
        } else {
            self.config.threshold
        }
    }

    /// Number of dealers whose share and commitment are both present
    pub fn contributions(&self) -> usize {
        self.qualified().len()
    }

    /// Whether enough contributions arrived to aggregate
    pub fn is_complete(&self) -> bool {
        self.contributions() >= self.required()
    }

    /// Whether [`DkgSession::aggregate`] already ran
    pub fn is_aggregated(&self) -> bool {
        self.aggregated
    }

    /// Sum the received shares into this party's group identity. Runs once.
    pub fn aggregate(&mut self) -> Result<ThresholdIdentity, DkgError> {
        if self.aggregated {
            return Err(DkgError::AlreadyAggregated);
        }
        let qualified = self.qualified();
        if qualified.len() < self.required() {
            return Err(DkgError::Incomplete {
                received: qualified.len(),
                required: self.required(),
            });
        }

        let secret = SecretShare::sum(qualified.iter().filter_map(|id| self.received.get(id)))?;
        let group_commitment =
            PublicCommitment::aggregate(qualified.iter().filter_map(|id| self.commitments.get(id)))?;
        let identity =
            ThresholdIdentity::from_parts(self.party_id, &secret, &group_commitment, &self.participants)?;

        self.aggregated = true;
        info!(
            party_id = self.party_id,
            dealers = qualified.len(),
            threshold = self.config.threshold,
            group_key = %identity.group_public_key().to_hex(),
            "DKG complete"
        );
        Ok(identity)
    }

    /// This party's contribution as messages: a commitment broadcast and one share per peer.
    pub fn outgoing(&self) -> Result<DkgResponder, DkgError> {
        let mut shares = BTreeMap::new();
        for &party in &self.parties {
            if party == self.party_id {
                continue;
            }
            shares.insert(party, self.compute_share_for(party)?.to_bytes().to_vec());
        }
        Ok(DkgResponder {
            party_id: self.party_id,
            commitment: self.commitment.clone(),
            shares,
            answered: HashMap::new(),
            limit: self.config.max_rebroadcasts,
        })
    }
}

impl fmt::Debug for DkgSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkgSession")
            .field("party_id", &self.party_id)
            .field("threshold", &self.config.threshold)
            .field("commitments", &self.commitments.len())
            .field("received", &self.received.len())
            .field("aggregated", &self.aggregated)
            .finish()
    }
}

/// This party's DKG contribution, kept after completion to answer peers still waiting.
#[derive(Debug)]
pub struct DkgResponder {
    party_id: PartyId,
    commitment: PublicCommitment,
    shares: BTreeMap<PartyId, Vec<u8>>,
    answered: HashMap<PartyId, u32>,
    limit: u32,
}

impl DkgResponder {
    fn commitment_message(&self) -> ConsensusMessage {
        ConsensusMessage::DkgCommitment {
            from: self.party_id,
            commitment: self.commitment.clone(),
        }
    }

    fn share_message(&self, to: PartyId) -> Option<ConsensusMessage> {
        self.shares.get(&to).map(|encoding| ConsensusMessage::DkgShare {
            from: self.party_id,
            to,
            secret_share_encoding: encoding.clone(),
        })
    }

    /// Send the commitment to everyone and each share to its recipient.
    pub async fn send_all<P>(&self, peers: &P)
    where
        P: PeerSet<ConsensusMessage> + ?Sized,
    {
        if let Err(e) = peers.broadcast(self.commitment_message()).await {
            warn!("Failed to broadcast DKG commitment: {}", e);
        }
        for &to in self.shares.keys() {
            if let Some(message) = self.share_message(to) {
                if let Err(e) = peers.send_to(to, message).await {
                    warn!(to, "Failed to send DKG share: {}", e);
                }
            }
        }
    }

    /// Messages answering a late DKG message from `party`, bounded per party.
    pub fn answer(&mut self, party: PartyId) -> Vec<ConsensusMessage> {
        let count = self.answered.entry(party).or_default();
        if *count >= self.limit {
            return Vec::new();
        }
        *count += 1;
        let mut messages = vec![self.commitment_message()];
        messages.extend(self.share_message(party));
        messages
    }
}

/// Result of a completed key generation run
#[derive(Debug)]
pub struct DkgOutcome {
    /// The aggregated identity
    pub identity: ThresholdIdentity,
    /// Non-DKG messages received during the run, in arrival order
    pub stashed: Vec<Envelope>,
    /// Handle for answering peers that are still waiting
    pub responder: DkgResponder,
}

/// Run `session` to completion over `peers`, reading replies from `inbound`.
pub async fn run_dkg<P>(
    mut session: DkgSession,
    peers: &P,
    inbound: &mut mpsc::Receiver<Envelope>,
) -> Result<DkgOutcome, ConsensusError>
where
    P: PeerSet<ConsensusMessage> + ?Sized,
{
    let responder = session.outgoing()?;
    let interval = session.config().rebroadcast_interval;
    let slices = session.config().max_rebroadcasts.max(1);
    let party_id = session.party_id();

    let mut stashed = Vec::new();
    let mut waiting: Vec<(PartyId, Vec<u8>)> = Vec::new();

    for slice in 0..slices {
        responder.send_all(peers).await;

        let deadline = Instant::now() + interval;
        while !session.is_complete() {
            let envelope = match tokio::time::timeout_at(deadline, inbound.recv()).await {
                Err(_) => break,
                Ok(None) => {
                    return Err(ConsensusError::KeyInitialization(
                        "inbound channel closed during DKG".into(),
                    ))
                }
                Ok(Some(envelope)) => envelope,
            };

            match envelope.message {
                ConsensusMessage::DkgCommitment { from, commitment } => {
                    match session.receive_commitment(from, commitment) {
                        Ok(true) => {
                            let (ready, rest): (Vec<_>, Vec<_>) =
                                waiting.drain(..).partition(|(dealer, _)| *dealer == from);
                            waiting = rest;
                            for (dealer, encoding) in ready {
                                if let Err(e) = session.receive_share(dealer, &encoding) {
                                    warn!(party_id, from = dealer, "Rejected DKG share: {}", e);
                                }
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!(party_id, from, "Rejected DKG commitment: {}", e),
                    }
                }
                ConsensusMessage::DkgShare {
                    from,
                    to,
                    secret_share_encoding,
                } if to == party_id => match session.receive_share(from, &secret_share_encoding) {
                    Ok(_) => {}
                    Err(DkgError::MissingCommitment(_)) => waiting.push((from, secret_share_encoding)),
                    Err(e) => warn!(party_id, from, "Rejected DKG share: {}", e),
                },
                ConsensusMessage::DkgShare { .. } => {}
                message => stashed.push(Envelope::new(envelope.from, message)),
            }
        }

        if session.is_complete() {
            let identity = session.aggregate()?;
            return Ok(DkgOutcome {
                identity,
                stashed,
                responder,
            });
        }

        info!(
            party_id,
            slice = slice + 1,
            contributions = session.contributions(),
            "DKG incomplete, re-sending contribution"
        );
    }

    Err(ConsensusError::KeyInitialization(format!(
        "DKG did not complete after {} slices ({} contributions)",
        slices,
        session.contributions()
    )))
}
