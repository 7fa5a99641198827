//! In-process multi-node simulation.
//!
//! Builds `n` engines that share a [`LocalNetwork`], generates their threshold keys
//! (with the DKG or a trusted dealer), runs them until every node has finalized the
//! requested number of rounds, and reports the finalized chains.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use roundchain_config::Config;
use roundchain_consensus::{
    run_dkg, share_index, Collaborators, ConsensusEngine, DkgResponder, DkgSession, Envelope,
    MessageRouter, Participant, ParticipantSet, ThresholdIdentity,
};
use roundchain_core::FinalizationObserver;
use roundchain_crypto::{deal, BlsPrivateKey};
use roundchain_types::{Block, PartyId, RoundNumber, H256};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::LocalNetwork;
use crate::pool::TxnPool;
use crate::settings;
use crate::store::{HashStateApplier, MemoryBlockStore};

/// Stake given to every simulated participant
const SIMULATED_STAKE: u64 = 100;

/// Transactions preloaded into every node's pool
const SYNTHETIC_TRANSACTIONS: usize = 10_000;

/// Records finalized rounds and publishes the highest one
pub struct ChainRecorder {
    chain: Mutex<Vec<(RoundNumber, H256)>>,
    progress: watch::Sender<RoundNumber>,
}

impl ChainRecorder {
    /// Empty recorder
    pub fn new() -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            chain: Mutex::new(Vec::new()),
            progress,
        }
    }

    /// Finalized `(round, block hash)` pairs in finalization order
    pub fn chain(&self) -> Vec<(RoundNumber, H256)> {
        self.chain.lock().clone()
    }

    /// Watch the highest finalized round
    pub fn subscribe(&self) -> watch::Receiver<RoundNumber> {
        self.progress.subscribe()
    }
}

impl Default for ChainRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FinalizationObserver for ChainRecorder {
    async fn on_round_finalized(&self, round: RoundNumber, block: &Block) {
        self.chain.lock().push((round, block.hash));
        self.progress.send_modify(|highest| *highest = (*highest).max(round));
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Rounds every node was asked to finalize
    pub rounds: u64,
    /// Finalized chain of every node
    pub chains: BTreeMap<PartyId, Vec<(RoundNumber, H256)>>,
    /// Messages delivered by the local network
    pub delivered: u64,
    /// Messages dropped by the local network
    pub dropped: u64,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Whether every node finalized the same first `rounds` blocks
    pub fn agreed(&self) -> bool {
        let mut prefixes = self.chains.values().map(|chain| {
            chain
                .iter()
                .take(self.rounds as usize)
                .copied()
                .collect::<Vec<_>>()
        });
        let Some(first) = prefixes.next() else {
            return false;
        };
        first.len() as u64 == self.rounds && prefixes.all(|other| other == first)
    }

    /// The agreed chain, when there is one
    pub fn common_chain(&self) -> Option<Vec<(RoundNumber, H256)>> {
        if !self.agreed() {
            return None;
        }
        self.chains
            .values()
            .next()
            .map(|chain| chain.iter().take(self.rounds as usize).copied().collect())
    }
}

/// Everything one node needs after key generation
struct KeyMaterial {
    identity: ThresholdIdentity,
    stashed: Vec<Envelope>,
    responder: Option<DkgResponder>,
}

/// One simulated node
pub struct SimulatedNode {
    /// Party id
    pub party: PartyId,
    /// Consensus engine
    pub engine: Arc<ConsensusEngine>,
    /// Transaction pool
    pub pool: Arc<TxnPool>,
    /// Finalized block store
    pub store: Arc<MemoryBlockStore>,
    /// Finalization recorder
    pub recorder: Arc<ChainRecorder>,
}

/// A configured simulation
pub struct Simulation {
    config: Config,
    timeout: Option<Duration>,
}

impl Simulation {
    /// Validate `config` and prepare a run
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid simulation configuration")?;
        Ok(Self {
            config,
            timeout: None,
        })
    }

    /// Give up after `timeout` instead of the round-timeout based default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The run's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn deadline(&self) -> Duration {
        if let Some(timeout) = self.timeout {
            return timeout;
        }
        let consensus = &self.config.consensus;
        let per_round = consensus.round_timeout() * (consensus.max_soft_timeouts + 1);
        let dkg = self.config.dkg.rebroadcast_interval() * self.config.dkg.max_rebroadcasts;
        dkg + per_round * (self.config.simulation.rounds as u32 + 1)
    }

    /// Node signing keys and the participant set derived from the simulation seed
    fn participants(&self) -> Result<(ParticipantSet, Vec<BlsPrivateKey>)> {
        let chain_id = &self.config.chain.chain_id;
        let seed = self.config.simulation.seed;
        let mut keys = Vec::with_capacity(self.config.simulation.nodes);
        let mut members = Vec::with_capacity(self.config.simulation.nodes);
        for party in 1..=self.config.simulation.nodes as PartyId {
            let ikm = H256::keccak256(format!("{}/node-key/{}/{}", chain_id, seed, party).as_bytes());
            let key = BlsPrivateKey::from_seed(ikm.as_bytes())
                .with_context(|| format!("deriving signing key for party {}", party))?;
            members.push(Participant::new(party, key.public_key(), SIMULATED_STAKE));
            keys.push(key);
        }
        Ok((ParticipantSet::new(members)?, keys))
    }

    fn deal_keys(&self, participants: &ParticipantSet) -> Result<Vec<KeyMaterial>> {
        let threshold = settings::threshold_from_percent(participants.len(), self.config.dkg.threshold_percent);
        let indices: Vec<_> = participants.ids().map(share_index).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.simulation.seed);
        let dealt = deal(threshold, &indices, &mut rng).context("trusted dealer failed")?;
        info!(threshold, parties = indices.len(), "Dealt threshold keys");

        participants
            .ids()
            .map(|party| -> Result<KeyMaterial> {
                let identity = ThresholdIdentity::from_dealt(party, &dealt, participants)?;
                Ok(KeyMaterial {
                    identity,
                    stashed: Vec::new(),
                    responder: None,
                })
            })
            .collect()
    }

    async fn generate_keys(
        &self,
        network: &LocalNetwork,
        participants: &ParticipantSet,
        inboxes: Vec<mpsc::Receiver<Envelope>>,
    ) -> Result<(Vec<KeyMaterial>, Vec<mpsc::Receiver<Envelope>>)> {
        let dkg = settings::dkg_config(&self.config.dkg, participants.len());
        info!(
            threshold = dkg.threshold,
            require_all = dkg.require_all_shares,
            "Running distributed key generation"
        );

        let mut tasks = Vec::with_capacity(inboxes.len());
        for (party, mut inbox) in participants.ids().zip(inboxes) {
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.simulation.seed ^ (party << 32));
            let session = DkgSession::new(party, participants, dkg.clone(), &mut rng)?;
            let peers = network.peers(party);
            tasks.push(tokio::spawn(async move {
                let outcome = run_dkg(session, &peers, &mut inbox).await;
                (party, outcome, inbox)
            }));
        }

        let mut material = Vec::with_capacity(tasks.len());
        let mut inboxes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (party, outcome, inbox) = task.await.context("DKG task panicked")?;
            let outcome = outcome.with_context(|| format!("key generation failed for party {}", party))?;
            debug!(party, stashed = outcome.stashed.len(), "Key generation finished");
            material.push(KeyMaterial {
                identity: outcome.identity,
                stashed: outcome.stashed,
                responder: Some(outcome.responder),
            });
            inboxes.push(inbox);
        }
        Ok((material, inboxes))
    }

    /// Run until every node has finalized `simulation.rounds` rounds.
    pub async fn run(&self) -> Result<SimulationReport> {
        let started = Instant::now();
        let sim = &self.config.simulation;
        info!(
            nodes = sim.nodes,
            rounds = sim.rounds,
            drop_percent = sim.drop_percent,
            trusted_dealer = self.config.dkg.trusted_dealer,
            "Starting simulation"
        );

        let (participants, keys) = self.participants()?;
        let network = LocalNetwork::new(settings::network_model(&self.config));
        let capacity = self.config.router.inbound_capacity;
        let inboxes: Vec<_> = participants
            .ids()
            .map(|party| network.connect(party, capacity))
            .collect();

        let (material, inboxes) = if self.config.dkg.trusted_dealer {
            (self.deal_keys(&participants)?, inboxes)
        } else {
            self.generate_keys(&network, &participants, inboxes).await?
        };

        let engine_config = settings::engine_config(&self.config);
        let quorum = settings::quorum_rule(&self.config.consensus);
        let tag = self.config.chain.chain_id.clone();

        let mut nodes = Vec::with_capacity(material.len());
        let mut pending = Vec::with_capacity(material.len());
        for (((party, key), generated), inbox) in participants
            .ids()
            .zip(keys)
            .zip(material)
            .zip(inboxes)
        {
            let pool = Arc::new(TxnPool::synthetic(&tag, SYNTHETIC_TRANSACTIONS));
            let store = Arc::new(MemoryBlockStore::new());
            let recorder = Arc::new(ChainRecorder::new());
            let collaborators = Collaborators {
                transactions: pool.clone(),
                state: Arc::new(HashStateApplier),
                store: store.clone(),
                peers: Arc::new(network.peers(party)),
                observer: recorder.clone(),
            };
            let engine = ConsensusEngine::new(
                party,
                key,
                participants.clone(),
                generated.identity,
                Arc::clone(&quorum),
                engine_config.clone(),
                collaborators,
            )?;
            if let Some(responder) = generated.responder {
                engine.set_dkg_responder(responder);
            }
            nodes.push(SimulatedNode {
                party,
                engine,
                pool,
                store,
                recorder,
            });
            pending.push((generated.stashed, inbox));
        }

        let mut routers: Vec<JoinHandle<()>> = Vec::with_capacity(nodes.len());
        for (node, (stashed, inbox)) in nodes.iter().zip(pending) {
            let mut router = MessageRouter::new(node.engine.clone(), settings::retry_config(&self.config.router));
            for envelope in stashed {
                router.route(envelope, 0).await;
            }
            routers.push(tokio::spawn(router.run(inbox)));
        }
        for node in &nodes {
            node.engine.start().await?;
        }

        let waited = tokio::time::timeout(self.deadline(), self.wait_for_rounds(&nodes)).await;
        for router in &routers {
            router.abort();
        }

        let chains: BTreeMap<PartyId, Vec<(RoundNumber, H256)>> = nodes
            .iter()
            .map(|node| (node.party, node.recorder.chain()))
            .collect();
        if waited.is_err() {
            let heights: Vec<String> = nodes
                .iter()
                .map(|node| format!("{}:{}", node.party, node.engine.finalized_round()))
                .collect();
            warn!(heights = %heights.join(","), "Simulation timed out");
            bail!(
                "simulation did not finalize {} rounds in time (finalized per node: {})",
                sim.rounds,
                heights.join(", ")
            );
        }

        let report = SimulationReport {
            rounds: sim.rounds,
            chains,
            delivered: network.stats().delivered(),
            dropped: network.stats().dropped(),
            elapsed: started.elapsed(),
        };
        for node in &nodes {
            debug!(
                party = node.party,
                stored = node.store.len(),
                pending_txns = node.pool.stats().pending,
                "Node summary"
            );
        }
        info!(
            agreed = report.agreed(),
            delivered = report.delivered,
            dropped = report.dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Simulation finished"
        );
        Ok(report)
    }

    async fn wait_for_rounds(&self, nodes: &[SimulatedNode]) {
        let target = self.config.simulation.rounds;
        for node in nodes {
            let mut progress = node.recorder.subscribe();
            if progress.wait_for(|highest| *highest >= target).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_agreement() {
        let a = H256::keccak256(b"a");
        let b = H256::keccak256(b"b");
        let mut report = SimulationReport {
            rounds: 2,
            chains: BTreeMap::new(),
            delivered: 0,
            dropped: 0,
            elapsed: Duration::ZERO,
        };
        assert!(!report.agreed());

        report.chains.insert(1, vec![(1, a), (2, b), (3, a)]);
        report.chains.insert(2, vec![(1, a), (2, b)]);
        assert!(report.agreed());
        assert_eq!(report.common_chain(), Some(vec![(1, a), (2, b)]));

        report.chains.insert(3, vec![(1, a), (2, a)]);
        assert!(!report.agreed());
        assert_eq!(report.common_chain(), None);
    }

    #[test]
    fn test_short_chain_is_not_agreement() {
        let a = H256::keccak256(b"a");
        let mut chains = BTreeMap::new();
        chains.insert(1, vec![(1, a)]);
        chains.insert(2, vec![(1, a)]);
        let report = SimulationReport {
            rounds: 3,
            chains,
            delivered: 0,
            dropped: 0,
            elapsed: Duration::ZERO,
        };
        assert!(!report.agreed());
    }

    #[tokio::test]
    async fn test_recorder_publishes_progress() {
        let recorder = ChainRecorder::new();
        let mut progress = recorder.subscribe();
        let block = Block::genesis(H256::NIL, H256::NIL);
        recorder.on_round_finalized(2, &block).await;
        recorder.on_round_finalized(1, &block).await;

        assert_eq!(*progress.borrow_and_update(), 2);
        assert_eq!(recorder.chain().len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.simulation.nodes = 0;
        assert!(Simulation::new(config).is_err());
    }
}
