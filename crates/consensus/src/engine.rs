//! The consensus engine.
//!
//! One engine runs per node. It owns the round registry and reacts to inbound
//! messages (dispatched by the [`MessageRouter`](crate::router::MessageRouter)) and
//! to its own timers. Round progression:
//!
//! 1. `start_round(r)` signs this node's beacon share once round `r - 1` is notarized
//! 2. `t` shares recover the round seed; the rank table follows
//! 3. generators propose, everyone verifies after the collection window and tickets
//! 4. ticket quorum notarizes the round, starts `r + 1` and finalizes up to `r - 1`
//!
//! A round that stays un-notarized through `max_soft_timeouts` timeouts restarts:
//! its beacon runs again under the next restart count, which elects a new leader.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use roundchain_core::{BlockStore, FinalizationObserver, PeerSet, StateApplier, TransactionSource};
use roundchain_crypto::{BlsPrivateKey, BlsSignature};
use roundchain_types::{Block, PartyId, RoundNumber, TxnRef, H256};
use tracing::{debug, error, info, trace, warn};

use crate::beacon::RandomBeacon;
use crate::dkg::{DkgResponder, ThresholdIdentity};
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::{ConsensusMessage, Envelope, FetchQuery};
use crate::quorum::QuorumRule;
use crate::rank::RankTable;
use crate::registry::RoundRegistry;
use crate::round::{Round, RoundPhase, RoundState};
use crate::types::{Domains, Notarization, ParticipantSet};

/// Boxed future used where engine methods recurse through spawned tasks
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How verification tickets reach the notarizing party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TicketDelivery {
    /// Broadcast to every participant
    #[default]
    Broadcast,
    /// Send point-to-point to the block's proposer
    Proposer,
}

/// Engine parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chain identifier used in signature domains
    pub chain_id: String,
    /// How long proposals are buffered before verification starts
    pub collection_window: Duration,
    /// Number of top-ranked parties allowed to propose
    pub num_generators: usize,
    /// Ticket delivery mode
    pub ticket_delivery: TicketDelivery,
    /// Fewest transactions a proposal may carry
    pub min_block_transactions: usize,
    /// Most transactions a proposal may carry
    pub max_block_transactions: usize,
    /// Delay before re-attempting a proposal that lacked transactions
    pub proposal_retry: Duration,
    /// Time without notarization before a round's soft timeout fires
    pub round_timeout: Duration,
    /// Soft timeouts before a round restarts
    pub max_soft_timeouts: u32,
    /// Finalized rounds kept in memory
    pub retained_rounds: u64,
    /// Finalized rounds whose transactions are still checked for double inclusion
    pub committed_retention: u64,
    /// Verify beacon shares against public key shares
    pub verify_beacon_shares: bool,
    /// State root of the genesis block
    pub genesis_state_root: H256,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: "roundchain-devnet".to_string(),
            collection_window: Duration::from_millis(300),
            num_generators: 1,
            ticket_delivery: TicketDelivery::Broadcast,
            min_block_transactions: 1,
            max_block_transactions: 100,
            proposal_retry: Duration::from_millis(100),
            round_timeout: Duration::from_millis(2000),
            max_soft_timeouts: 5,
            retained_rounds: 4,
            committed_retention: 256,
            verify_beacon_shares: true,
            genesis_state_root: H256::NIL,
        }
    }
}

impl EngineConfig {
    /// Create a fast configuration for testing
    pub fn fast() -> Self {
        Self {
            collection_window: Duration::from_millis(20),
            proposal_retry: Duration::from_millis(20),
            round_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }
}

/// External services the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    /// Pending transactions
    pub transactions: Arc<dyn TransactionSource>,
    /// State transition function
    pub state: Arc<dyn StateApplier>,
    /// Finalized block storage
    pub store: Arc<dyn BlockStore>,
    /// Transport to the other participants
    pub peers: Arc<dyn PeerSet<ConsensusMessage>>,
    /// Finalization callback
    pub observer: Arc<dyn FinalizationObserver>,
}

/// Transactions of finalized blocks, grouped by round for pruning
#[derive(Debug, Default)]
pub(crate) struct CommittedTxns {
    by_round: BTreeMap<RoundNumber, Vec<TxnRef>>,
    txns: HashSet<TxnRef>,
}

impl CommittedTxns {
    pub(crate) fn insert(&mut self, round: RoundNumber, txns: &[TxnRef]) {
        self.txns.extend(txns.iter().copied());
        self.by_round.entry(round).or_default().extend_from_slice(txns);
    }

    pub(crate) fn contains(&self, txn: &TxnRef) -> bool {
        self.txns.contains(txn)
    }

    /// Forget every round below `round`.
    pub(crate) fn prune_below(&mut self, round: RoundNumber) {
        let kept = self.by_round.split_off(&round);
        let pruned = std::mem::replace(&mut self.by_round, kept);
        for txn in pruned.into_values().flatten() {
            self.txns.remove(&txn);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.txns.len()
    }
}

/// Per-node consensus engine
pub struct ConsensusEngine {
    pub(crate) party_id: PartyId,
    pub(crate) signing_key: BlsPrivateKey,
    pub(crate) participants: ParticipantSet,
    pub(crate) quorum: Arc<dyn QuorumRule>,
    pub(crate) config: EngineConfig,
    pub(crate) domains: Domains,
    pub(crate) beacon: RandomBeacon,
    pub(crate) registry: RoundRegistry,
    pub(crate) collaborators: Collaborators,
    /// Notarized blocks of the retained window, by hash
    pub(crate) index: Mutex<HashMap<H256, (Block, Notarization)>>,
    /// Transactions of recently finalized blocks
    pub(crate) committed: Mutex<CommittedTxns>,
    /// Hash of the finalized head
    pub(crate) finalized_head: Mutex<H256>,
    pub(crate) finalize_lock: tokio::sync::Mutex<()>,
    dkg_responder: Mutex<Option<DkgResponder>>,
    genesis: Block,
}

impl ConsensusEngine {
    /// Create an engine.
    ///
    /// Fails with [`ConsensusError::KeyInitialization`] when the signing key or threshold
    /// identity does not belong to `party_id`.
    pub fn new(
        party_id: PartyId,
        signing_key: BlsPrivateKey,
        participants: ParticipantSet,
        identity: ThresholdIdentity,
        quorum: Arc<dyn QuorumRule>,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> ConsensusResult<Arc<Self>> {
        let participant = participants.get(party_id).ok_or_else(|| {
            ConsensusError::KeyInitialization(format!("party {} is not a participant", party_id))
        })?;
        if participant.signing_key != signing_key.public_key() {
            return Err(ConsensusError::KeyInitialization(
                "signing key does not match the participant entry".into(),
            ));
        }
        if identity.party_id() != party_id {
            return Err(ConsensusError::KeyInitialization(format!(
                "threshold identity belongs to party {}",
                identity.party_id()
            )));
        }
        if config.num_generators == 0 {
            return Err(ConsensusError::KeyInitialization(
                "at least one generator is required".into(),
            ));
        }

        let domains = Domains::new(&config.chain_id);
        let beacon = RandomBeacon::new(
            Arc::new(identity),
            domains.beacon.clone(),
            config.verify_beacon_shares,
        );
        let genesis = Block::genesis(
            RandomBeacon::genesis_output(&config.chain_id),
            config.genesis_state_root,
        );

        let mut index = HashMap::new();
        index.insert(genesis.hash, (genesis.clone(), Notarization::genesis(&genesis)));

        Ok(Arc::new(Self {
            party_id,
            signing_key,
            participants,
            quorum,
            domains,
            beacon,
            registry: RoundRegistry::new(genesis.clone()),
            collaborators,
            index: Mutex::new(index),
            committed: Mutex::new(CommittedTxns::default()),
            finalized_head: Mutex::new(genesis.hash),
            finalize_lock: tokio::sync::Mutex::new(()),
            dkg_responder: Mutex::new(None),
            genesis,
            config,
        }))
    }

    /// Our party id
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    /// Engine parameters
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The participant set
    pub fn participants(&self) -> &ParticipantSet {
        &self.participants
    }

    /// Signature domains
    pub fn domains(&self) -> &Domains {
        &self.domains
    }

    /// The round registry
    pub fn registry(&self) -> &RoundRegistry {
        &self.registry
    }

    /// The genesis block
    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Highest finalized round
    pub fn finalized_round(&self) -> RoundNumber {
        self.registry.finalized_round()
    }

    /// Finalized transactions still inside the retention horizon
    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }

    /// Phase of `round`, if held
    pub fn round_phase(&self, round: RoundNumber) -> Option<RoundPhase> {
        self.registry.get(round).map(|r| r.phase())
    }

    /// Block notarized in `round`, if known
    pub fn notarized_block(&self, round: RoundNumber) -> Option<Block> {
        if let Some(block) = self.registry.get(round).and_then(|r| r.notarized_block()) {
            return Some(block);
        }
        self.index
            .lock()
            .values()
            .find(|(block, _)| block.round == round)
            .map(|(block, _)| block.clone())
    }

    /// Keep this node's DKG contribution to answer peers that are still generating keys
    pub fn set_dkg_responder(&self, responder: DkgResponder) {
        *self.dkg_responder.lock() = Some(responder);
    }

    /// Store genesis and start round 1.
    pub async fn start(self: &Arc<Self>) -> ConsensusResult<()> {
        if !self.collaborators.store.contains(&self.genesis.hash).await? {
            self.collaborators.store.write(&self.genesis).await?;
        }
        info!(
            party_id = self.party_id,
            participants = self.participants.len(),
            threshold = self.beacon.threshold(),
            genesis = %self.genesis.hash.short(),
            "Starting consensus"
        );
        self.start_round(1).await;
        Ok(())
    }

    /// Enter `round`: sign our beacon share once the predecessor is notarized.
    pub(crate) fn start_round(self: &Arc<Self>, round: RoundNumber) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let current = match self.registry.advance(round) {
                Ok(current) => current,
                Err(e) => {
                    debug!(round, "Cannot start round yet: {}", e);
                    return;
                }
            };
            let predecessor_notarized = self
                .registry
                .get(round.saturating_sub(1))
                .map(|p| p.phase().is_notarized())
                .unwrap_or(false);

            let (share, first_start) = {
                let mut state = current.lock();
                if state.phase().is_notarized() {
                    return;
                }
                let first_start = !state.started;
                state.started = true;
                let share = if predecessor_notarized {
                    self.sign_own_share(&current, &mut state)
                } else {
                    None
                };
                (share, first_start)
            };

            if first_start {
                info!(round, party_id = self.party_id, "Starting round");
                let this = Arc::clone(self);
                let timed = Arc::clone(&current);
                tokio::spawn(async move { this.run_round_timer(timed).await });
            }

            if let Some((restarts, signature)) = share {
                self.publish_share(round, restarts, signature).await;
            }

            if current.seed().is_some() {
                self.on_round_seeded(&current);
            }
        })
    }

    /// Sign our share under the round's current restart count, unless one exists.
    fn sign_own_share(&self, current: &Round, state: &mut RoundState) -> Option<(u32, BlsSignature)> {
        if state.own_share.is_some() || state.seed.is_some() {
            return None;
        }
        let restarts = state.beacon.restarts();
        let signature = self
            .beacon
            .sign_share(current.number(), restarts, current.previous_output());
        state.own_share = Some(signature.clone());
        Some((restarts, signature))
    }

    /// Count our own share, then broadcast it.
    async fn publish_share(self: &Arc<Self>, round: RoundNumber, restarts: u32, signature: BlsSignature) {
        if let Err(e) = self.on_beacon_share(round, self.party_id, restarts, signature.clone()) {
            error!(round, "Own beacon share rejected: {}", e);
        }
        let message = ConsensusMessage::BeaconShare {
            round,
            party_id: self.party_id,
            restarts,
            partial_signature: signature,
        };
        if let Err(e) = self.collaborators.peers.broadcast(message).await {
            error!("Failed to broadcast beacon share: {}", e);
        }
    }

    /// Process one inbound message.
    pub async fn handle_message(self: &Arc<Self>, envelope: Envelope) -> ConsensusResult<()> {
        trace!(from = envelope.from, kind = envelope.message.kind(), "Handling message");
        match envelope.message {
            ConsensusMessage::BeaconShare {
                round,
                party_id,
                restarts,
                partial_signature,
            } => self.on_beacon_share(round, party_id, restarts, partial_signature),
            ConsensusMessage::BlockProposal { block } => self.on_proposal(block).await,
            ConsensusMessage::VerificationTicket(ticket) => self.on_ticket(ticket).await,
            ConsensusMessage::Notarization(notarization) => self.on_notarization(notarization).await,
            ConsensusMessage::NotarizedBlockRequest { from, query } => {
                self.on_fetch_request(from, query).await
            }
            ConsensusMessage::NotarizedBlock {
                block,
                notarization,
            } => self.on_notarized_block(block, notarization).await,
            ConsensusMessage::DkgShare { from, .. } | ConsensusMessage::DkgCommitment { from, .. } => {
                self.answer_dkg(from).await;
                Ok(())
            }
        }
    }

    /// Add a beacon share; recovers the seed once `t` shares are present.
    ///
    /// Shares from an earlier restart of the round are ignored. Shares from a later
    /// one fail with [`ConsensusError::RoundNotReady`] until this node restarts too.
    pub fn on_beacon_share(
        self: &Arc<Self>,
        round: RoundNumber,
        party: PartyId,
        restarts: u32,
        signature: BlsSignature,
    ) -> ConsensusResult<()> {
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;

        let seeded = {
            let mut state = current.lock();
            if state.seed.is_some() {
                return Ok(());
            }
            let local = state.beacon.restarts();
            if restarts < local {
                trace!(round, party, restarts, local, "Ignoring share from an abandoned attempt");
                return Ok(());
            }
            if restarts > local {
                return Err(ConsensusError::RoundNotReady {
                    round,
                    phase: state.phase(),
                });
            }
            let reached = self.beacon.add_share(&mut state.beacon, party, signature)?;
            state.advance(RoundPhase::BeaconPending);
            if reached {
                let output = self.beacon.recover(&mut state.beacon)?;
                let ranks = RankTable::compute(&output, &self.participants);
                state.set_seed(output, ranks);
                state.advance(RoundPhase::Verifying);
                state.rank_table.as_ref().and_then(RankTable::leader).map(|leader| (output, leader))
            } else {
                None
            }
        };

        if let Some((seed, leader)) = seeded {
            info!(round, seed = %seed.short(), leader, "Beacon complete");
            self.on_round_seeded(&current);
        }
        Ok(())
    }

    /// Start proposing or verifying once a round has its seed and its predecessor.
    pub(crate) fn on_round_seeded(self: &Arc<Self>, current: &Arc<Round>) {
        let round = current.number();
        let predecessor_ready = self.notarized_in(round.saturating_sub(1)).is_some();
        if !predecessor_ready {
            return;
        }

        let (propose, verify) = {
            let mut state = current.lock();
            if state.phase().is_notarized() || state.phase() < RoundPhase::Verifying {
                return;
            }
            let generator = state
                .rank_table
                .as_ref()
                .map(|ranks| ranks.is_generator(self.party_id, self.config.num_generators))
                .unwrap_or(false);
            let propose = generator && !state.proposing;
            if propose {
                state.proposing = true;
            }
            let verify = !state.verifier_running
                && state.ticket_sent.is_none()
                && !state.candidates_by_rank().is_empty();
            (propose, verify)
        };

        if propose {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_proposer(round).await });
        }
        if verify {
            self.spawn_verification(current, Duration::ZERO);
        }
    }

    /// Block notarized in `round`, from the round or the index
    pub(crate) fn notarized_in(&self, round: RoundNumber) -> Option<Block> {
        self.notarized_block(round)
    }

    /// Look up a block by hash: notarized index first, then the store.
    pub(crate) async fn lookup_block(&self, hash: &H256) -> ConsensusResult<Option<Block>> {
        if let Some((block, _)) = self.index.lock().get(hash) {
            return Ok(Some(block.clone()));
        }
        Ok(self.collaborators.store.read(hash).await?)
    }

    /// Ask every peer for a notarized block.
    pub(crate) async fn request_block(&self, query: FetchQuery) {
        debug!(?query, "Requesting notarized block");
        let message = ConsensusMessage::NotarizedBlockRequest {
            from: self.party_id,
            query,
        };
        if let Err(e) = self.collaborators.peers.broadcast(message).await {
            warn!("Failed to send fetch request: {}", e);
        }
    }

    /// Answer a catch-up request from the notarized index, falling back to the store.
    pub async fn on_fetch_request(&self, from: PartyId, query: FetchQuery) -> ConsensusResult<()> {
        let found = match query {
            FetchQuery::Round(round) => self
                .registry
                .get(round)
                .and_then(|r| Some((r.notarized_block()?, r.notarization()?)))
                .or_else(|| {
                    self.index
                        .lock()
                        .values()
                        .find(|(block, _)| block.round == round)
                        .cloned()
                }),
            FetchQuery::Hash(hash) => {
                let indexed = self.index.lock().get(&hash).cloned();
                match indexed {
                    Some(entry) => Some(entry),
                    None => self
                        .collaborators
                        .store
                        .read(&hash)
                        .await?
                        .filter(Block::is_genesis)
                        .map(|block| {
                            let notarization = Notarization::genesis(&block);
                            (block, notarization)
                        }),
                }
            }
        };

        match found {
            Some((block, notarization)) => {
                trace!(to = from, round = block.round, "Serving notarized block");
                self.collaborators
                    .peers
                    .send_to(
                        from,
                        ConsensusMessage::NotarizedBlock {
                            block,
                            notarization,
                        },
                    )
                    .await?;
            }
            None => debug!(from, ?query, "Cannot serve fetch request"),
        }
        Ok(())
    }

    async fn answer_dkg(&self, from: PartyId) {
        let messages = match self.dkg_responder.lock().as_mut() {
            Some(responder) => responder.answer(from),
            None => return,
        };
        for message in messages {
            if let Err(e) = self.collaborators.peers.send_to(from, message).await {
                warn!(to = from, "Failed to answer DKG peer: {}", e);
            }
        }
    }

    /// Re-send our own messages while a round stays un-notarized, and restart it
    /// once `max_soft_timeouts` timeouts passed without progress.
    async fn run_round_timer(self: Arc<Self>, current: Arc<Round>) {
        let round = current.number();
        loop {
            tokio::time::sleep(self.config.round_timeout).await;
            // A discarded round may have been recreated with its own timer.
            let held = self
                .registry
                .get(round)
                .map(|r| Arc::ptr_eq(&r, &current))
                .unwrap_or(false);
            if !held {
                return;
            }

            let restarted = {
                let mut state = current.lock();
                if state.phase().is_notarized() {
                    return;
                }
                if state.soft_timeouts >= self.config.max_soft_timeouts {
                    state.restart()
                } else {
                    None
                }
            };
            if let Some(restarts) = restarted {
                self.restart_round(&current, restarts).await;
                continue;
            }

            let (count, restarts, share, proposal, tickets, pending, seeded) = {
                let mut state = current.lock();
                state.soft_timeouts += 1;
                (
                    state.soft_timeouts,
                    state.beacon.restarts(),
                    state.own_share.clone(),
                    state.own_proposal.clone(),
                    state.own_tickets.clone(),
                    state.pending_notarization.as_ref().map(|n| n.block_hash),
                    state.seed.is_some(),
                )
            };

            warn!(round, count, phase = %current.phase(), "Round soft timeout, re-sending own messages");
            let peers = &self.collaborators.peers;

            if let Some(partial_signature) = share {
                let message = ConsensusMessage::BeaconShare {
                    round,
                    party_id: self.party_id,
                    restarts,
                    partial_signature,
                };
                if let Err(e) = peers.broadcast(message).await {
                    warn!("Failed to re-send beacon share: {}", e);
                }
            } else if !seeded {
                // Our share waits on the predecessor; it may have been notarized without us.
                self.request_block(FetchQuery::Round(round.saturating_sub(1))).await;
            }
            if restarts > 0 && !seeded {
                self.request_block(FetchQuery::Round(round)).await;
            }
            if let Some(block) = proposal {
                if let Err(e) = peers.broadcast(ConsensusMessage::BlockProposal { block }).await {
                    warn!("Failed to re-send proposal: {}", e);
                }
            }
            for (ticket, proposer) in tickets {
                self.deliver_ticket(ticket, proposer).await;
            }
            if let Some(hash) = pending {
                self.request_block(FetchQuery::Hash(hash)).await;
            }
        }
    }

    /// Rejoin a restarted round: drop its stale successor and sign a fresh share.
    async fn restart_round(self: &Arc<Self>, current: &Arc<Round>, restarts: u32) {
        let round = current.number();
        warn!(round, restarts, "Round not notarized in time, restarting beacon");
        self.registry.discard_stale_successor(round, None);

        let predecessor_notarized = self.notarized_in(round.saturating_sub(1)).is_some();
        let share = if predecessor_notarized {
            let mut state = current.lock();
            self.sign_own_share(current, &mut state)
        } else {
            None
        };
        match share {
            Some((restarts, signature)) => self.publish_share(round, restarts, signature).await,
            None => self.request_block(FetchQuery::Round(round.saturating_sub(1))).await,
        }
        // Peers may have notarized the round under the seed we gave up.
        self.request_block(FetchQuery::Round(round)).await;
    }
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("party_id", &self.party_id)
            .field("participants", &self.participants.len())
            .field("finalized_round", &self.finalized_round())
            .finish_non_exhaustive()
    }
}
