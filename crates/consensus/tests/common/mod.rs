//! Shared fixtures for the consensus integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::mpsc;

use roundchain_consensus::{
    share_index, Collaborators, ConsensusEngine, ConsensusMessage, CountQuorum, Domains,
    EngineConfig, Envelope, Notarization, Participant, ParticipantSet, RandomBeacon,
    ThresholdIdentity, VerificationTicket,
};
use roundchain_core::{
    BlockStore, FinalizationObserver, PeerResult, PeerSet, SourceResult, StateApplier,
    StateResult, StorageError, StorageResult, TransactionSource,
};
use roundchain_crypto::{deal, BlsPrivateKey, BlsSignature};
use roundchain_types::{Block, PartyId, RoundNumber, TxnRef, H256};

pub const CHAIN_ID: &str = "roundchain-test";

/// Fast timers and two transactions per block
pub fn test_config() -> EngineConfig {
    EngineConfig {
        chain_id: CHAIN_ID.to_string(),
        max_block_transactions: 2,
        ..EngineConfig::fast()
    }
}

/// Deterministic node signing key for `party`
pub fn create_test_key(party: PartyId) -> BlsPrivateKey {
    let mut ikm = [0u8; 32];
    ikm[..8].copy_from_slice(&party.to_le_bytes());
    ikm[31] = 0xaa;
    BlsPrivateKey::from_seed(&ikm).unwrap()
}

/// Parties `1..=n` with equal stake, and their node signing keys
pub fn create_test_participants(n: usize) -> (ParticipantSet, Vec<BlsPrivateKey>) {
    let keys: Vec<BlsPrivateKey> = (1..=n as u64).map(create_test_key).collect();
    let participants = ParticipantSet::new(
        keys.iter()
            .enumerate()
            .map(|(i, key)| Participant::new(i as u64 + 1, key.public_key(), 100))
            .collect(),
    )
    .unwrap();
    (participants, keys)
}

/// Threshold identities for every participant from one trusted deal
pub fn deal_identities(participants: &ParticipantSet, threshold: usize, seed: u64) -> Vec<ThresholdIdentity> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let indices: Vec<u64> = participants.ids().map(share_index).collect();
    let dealt = deal(threshold, &indices, &mut rng).unwrap();
    participants
        .ids()
        .map(|id| ThresholdIdentity::from_dealt(id, &dealt, participants).unwrap())
        .collect()
}

/// Beacon instance for one identity
pub fn beacon_for(identity: &ThresholdIdentity) -> RandomBeacon {
    RandomBeacon::new(
        Arc::new(identity.clone()),
        Domains::new(CHAIN_ID).beacon,
        true,
    )
}

/// Beacon share of `identity` for `round`
pub fn beacon_share(identity: &ThresholdIdentity, round: RoundNumber, prev_output: &H256) -> BlsSignature {
    beacon_share_at(identity, round, 0, prev_output)
}

/// Beacon share of `identity` for the `restarts`-th restart of `round`
pub fn beacon_share_at(
    identity: &ThresholdIdentity,
    round: RoundNumber,
    restarts: u32,
    prev_output: &H256,
) -> BlsSignature {
    beacon_for(identity).sign_share(round, restarts, prev_output)
}

/// Beacon outputs of rounds `0..=rounds`, computed without any engine
pub fn offline_beacon_chain(identities: &[ThresholdIdentity], rounds: u64) -> Vec<H256> {
    let beacon = beacon_for(&identities[0]);
    let mut outputs = vec![RandomBeacon::genesis_output(CHAIN_ID)];
    for round in 1..=rounds {
        let prev = outputs[round as usize - 1];
        let mut shares = roundchain_consensus::BeaconShares::new(round, prev);
        for identity in identities.iter().take(beacon.threshold()) {
            beacon
                .add_share(&mut shares, identity.party_id(), beacon_share(identity, round, &prev))
                .unwrap();
        }
        outputs.push(beacon.recover(&mut shares).unwrap());
    }
    outputs
}

/// A ticket for `block_hash` signed by `verifier`
pub fn ticket(
    block_hash: H256,
    round: RoundNumber,
    verifier: PartyId,
    keys: &[BlsPrivateKey],
) -> VerificationTicket {
    VerificationTicket::sign(
        block_hash,
        round,
        verifier,
        &keys[verifier as usize - 1],
        &Domains::new(CHAIN_ID).ticket,
    )
}

/// A notarization for `block` carrying tickets from `verifiers`
pub fn notarization(block: &Block, verifiers: &[PartyId], keys: &[BlsPrivateKey]) -> Notarization {
    Notarization {
        block_hash: block.hash,
        round: block.round,
        tickets: verifiers
            .iter()
            .map(|&v| ticket(block.hash, block.round, v, keys))
            .collect(),
    }
}

pub fn test_transactions(count: usize) -> Vec<TxnRef> {
    (0..count)
        .map(|i| TxnRef::from_payload(format!("txn-{}", i).as_bytes()))
        .collect()
}

/// Transaction source over a fixed pending list
#[derive(Default)]
pub struct MockTxnSource {
    pending: Mutex<Vec<TxnRef>>,
    committed: Mutex<Vec<TxnRef>>,
}

impl MockTxnSource {
    pub fn with_transactions(txns: Vec<TxnRef>) -> Self {
        Self {
            pending: Mutex::new(txns),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn committed(&self) -> Vec<TxnRef> {
        self.committed.lock().clone()
    }
}

#[async_trait]
impl TransactionSource for MockTxnSource {
    async fn take(&self, max_count: usize) -> SourceResult<Vec<TxnRef>> {
        Ok(self.pending.lock().iter().take(max_count).copied().collect())
    }

    async fn mark_committed(&self, txns: &[TxnRef]) -> SourceResult<()> {
        self.pending.lock().retain(|t| !txns.contains(t));
        self.committed.lock().extend_from_slice(txns);
        Ok(())
    }
}

/// State root = keccak(prev || txns)
pub struct HashState;

impl HashState {
    pub fn root(prev: H256, txns: &[TxnRef]) -> H256 {
        let mut parts: Vec<&[u8]> = vec![prev.as_bytes()];
        parts.extend(txns.iter().map(|t| t.as_bytes()));
        H256::keccak256_concat(&parts)
    }
}

#[async_trait]
impl StateApplier for HashState {
    async fn apply(&self, prev_state: H256, txns: &[TxnRef]) -> StateResult<H256> {
        Ok(Self::root(prev_state, txns))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<H256, Block>>,
    failing_writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Make the next `count` writes fail with an I/O error
    pub fn fail_next_writes(&self, count: usize) {
        *self.failing_writes.lock() = count;
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn write(&self, block: &Block) -> StorageResult<()> {
        {
            let mut failing = self.failing_writes.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(StorageError::Io("disk full".into()));
            }
        }
        self.blocks.lock().insert(block.hash, block.clone());
        Ok(())
    }

    async fn read(&self, hash: &H256) -> StorageResult<Option<Block>> {
        Ok(self.blocks.lock().get(hash).cloned())
    }
}

/// Peer set that records outbound messages; `None` target means broadcast
pub struct RecordingPeers {
    party: PartyId,
    sent: Mutex<Vec<(Option<PartyId>, ConsensusMessage)>>,
    yielding: bool,
}

impl RecordingPeers {
    pub fn new(party: PartyId) -> Self {
        Self {
            party,
            sent: Mutex::new(Vec::new()),
            yielding: false,
        }
    }

    /// Peer set that suspends once per send, like a real transport
    pub fn yielding(party: PartyId) -> Self {
        Self {
            yielding: true,
            ..Self::new(party)
        }
    }

    pub fn sent(&self) -> Vec<(Option<PartyId>, ConsensusMessage)> {
        self.sent.lock().clone()
    }

    pub fn proposal_for(&self, round: RoundNumber) -> Option<Block> {
        self.sent.lock().iter().find_map(|(_, m)| match m {
            ConsensusMessage::BlockProposal { block } if block.round == round => Some(block.clone()),
            _ => None,
        })
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|(_, m)| m.kind() == kind).count()
    }

    /// Beacon shares this node broadcast for `round`, with their restart counts
    pub fn shares_for(&self, round: RoundNumber) -> Vec<u32> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, m)| match m {
                ConsensusMessage::BeaconShare {
                    round: r, restarts, ..
                } if *r == round => Some(*restarts),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PeerSet<ConsensusMessage> for RecordingPeers {
    async fn broadcast(&self, message: ConsensusMessage) -> PeerResult<()> {
        self.sent.lock().push((None, message));
        if self.yielding {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn send_to(&self, party: PartyId, message: ConsensusMessage) -> PeerResult<()> {
        self.sent.lock().push((Some(party), message));
        if self.yielding {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn local_party(&self) -> PartyId {
        self.party
    }
}

/// Peer set delivering straight into the other parties' inbound channels
pub struct ChannelPeers {
    party: PartyId,
    senders: HashMap<PartyId, mpsc::Sender<Envelope>>,
}

impl ChannelPeers {
    pub fn new(party: PartyId, senders: HashMap<PartyId, mpsc::Sender<Envelope>>) -> Self {
        Self { party, senders }
    }
}

#[async_trait]
impl PeerSet<ConsensusMessage> for ChannelPeers {
    async fn broadcast(&self, message: ConsensusMessage) -> PeerResult<()> {
        for (&party, sender) in &self.senders {
            if party != self.party {
                let _ = sender.send(Envelope::new(self.party, message.clone())).await;
            }
        }
        Ok(())
    }

    async fn send_to(&self, party: PartyId, message: ConsensusMessage) -> PeerResult<()> {
        if let Some(sender) = self.senders.get(&party) {
            let _ = sender.send(Envelope::new(self.party, message)).await;
        }
        Ok(())
    }

    fn local_party(&self) -> PartyId {
        self.party
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    finalized: Mutex<Vec<(RoundNumber, H256)>>,
}

impl RecordingObserver {
    pub fn finalized(&self) -> Vec<(RoundNumber, H256)> {
        self.finalized.lock().clone()
    }
}

#[async_trait]
impl FinalizationObserver for RecordingObserver {
    async fn on_round_finalized(&self, round: RoundNumber, block: &Block) {
        self.finalized.lock().push((round, block.hash));
    }
}

/// One engine wired to recording collaborators
pub struct TestNode {
    pub engine: Arc<ConsensusEngine>,
    pub peers: Arc<RecordingPeers>,
    pub observer: Arc<RecordingObserver>,
    pub store: Arc<MemoryStore>,
    pub txns: Arc<MockTxnSource>,
    pub keys: Vec<BlsPrivateKey>,
    pub identities: Vec<ThresholdIdentity>,
    pub participants: ParticipantSet,
}

impl TestNode {
    /// Engine for `party` in an `n`-party network with threshold 3 and count quorum 2/3
    pub fn new(party: PartyId, n: usize, config: EngineConfig) -> Self {
        Self::with_peers(party, n, config, RecordingPeers::new(party))
    }

    /// Like [`TestNode::new`], sending through `peers`
    pub fn with_peers(party: PartyId, n: usize, config: EngineConfig, peers: RecordingPeers) -> Self {
        let (participants, keys) = create_test_participants(n);
        let identities = deal_identities(&participants, 3, 7);
        let peers = Arc::new(peers);
        let observer = Arc::new(RecordingObserver::default());
        let store = Arc::new(MemoryStore::default());
        let txns = Arc::new(MockTxnSource::with_transactions(test_transactions(50)));

        let collaborators = Collaborators {
            transactions: txns.clone(),
            state: Arc::new(HashState),
            store: store.clone(),
            peers: peers.clone(),
            observer: observer.clone(),
        };
        let engine = ConsensusEngine::new(
            party,
            keys[party as usize - 1].clone(),
            participants.clone(),
            identities[party as usize - 1].clone(),
            Arc::new(CountQuorum::default()),
            EngineConfig {
                chain_id: CHAIN_ID.to_string(),
                ..config
            },
            collaborators,
        )
        .unwrap();

        Self {
            engine,
            peers,
            observer,
            store,
            txns,
            keys,
            identities,
            participants,
        }
    }

    pub fn identity(&self, party: PartyId) -> &ThresholdIdentity {
        &self.identities[party as usize - 1]
    }

    pub fn key(&self, party: PartyId) -> &BlsPrivateKey {
        &self.keys[party as usize - 1]
    }

    /// Deliver beacon shares for `round` from `parties`
    pub async fn feed_shares(&self, round: RoundNumber, parties: &[PartyId]) {
        self.feed_shares_at(round, 0, parties).await;
    }

    /// Deliver beacon shares for the `restarts`-th restart of `round` from `parties`
    pub async fn feed_shares_at(&self, round: RoundNumber, restarts: u32, parties: &[PartyId]) {
        let prev = *self
            .engine
            .registry()
            .get(round)
            .expect("round must exist")
            .previous_output();
        for &party in parties {
            let share = beacon_share_at(self.identity(party), round, restarts, &prev);
            let envelope = Envelope::new(
                party,
                ConsensusMessage::BeaconShare {
                    round,
                    party_id: party,
                    restarts,
                    partial_signature: share,
                },
            );
            self.engine.handle_message(envelope).await.unwrap();
        }
    }

    /// Round leader, once the round is seeded
    pub fn leader(&self, round: RoundNumber) -> PartyId {
        let seed = self.engine.registry().get(round).unwrap().seed().unwrap();
        roundchain_consensus::RankTable::compute(&seed, &self.participants)
            .leader()
            .unwrap()
    }

    /// A valid block for `round` proposed by `proposer`
    pub fn build_block(&self, round: RoundNumber, proposer: PartyId, txns: Vec<TxnRef>) -> Block {
        let prev = self.engine.notarized_block(round - 1).expect("predecessor notarized");
        let seed = self.engine.registry().get(round).unwrap().seed().unwrap();
        let state_root = HashState::root(prev.state_root, &txns);
        Block::new_signed(
            round,
            prev.hash,
            proposer,
            seed,
            txns,
            state_root,
            self.key(proposer),
            &self.engine.domains().proposal,
        )
    }

    /// The round's leader block: our own proposal when we lead, else one built for the leader
    pub async fn leader_block(&self, round: RoundNumber) -> Block {
        let leader = self.leader(round);
        if leader == self.engine.party_id() {
            wait_until(Duration::from_secs(2), || self.peers.proposal_for(round).is_some()).await;
            return self.peers.proposal_for(round).unwrap();
        }
        let offset = (round as usize * 2) % 40;
        let txns = test_transactions(50)[offset..offset + 2].to_vec();
        let block = self.build_block(round, leader, txns);
        self.engine
            .handle_message(Envelope::new(
                leader,
                ConsensusMessage::BlockProposal {
                    block: block.clone(),
                },
            ))
            .await
            .unwrap();
        block
    }

    /// Seed `round` with external shares, deliver the leader block and three external tickets
    pub async fn drive_round(&self, round: RoundNumber) -> Block {
        let me = self.engine.party_id();
        let others: Vec<PartyId> = self.participants.ids().filter(|&p| p != me).collect();
        self.feed_shares(round, &others[..2]).await;
        let block = self.leader_block(round).await;
        for &verifier in &others {
            let ticket = ticket(block.hash, round, verifier, &self.keys);
            self.engine
                .handle_message(Envelope::new(verifier, ConsensusMessage::VerificationTicket(ticket)))
                .await
                .unwrap();
        }
        block
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
