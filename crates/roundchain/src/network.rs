//! In-process transport between simulated nodes.
//!
//! Every registered party gets a bounded inbound channel. Sends are delivered by a
//! spawned task after a latency drawn from a seeded `ChaCha8Rng`, so delivery order
//! differs from send order. A configurable share of messages is dropped outright.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roundchain_consensus::{ConsensusMessage, Envelope};
use roundchain_core::{PeerError, PeerResult, PeerSet};
use roundchain_types::PartyId;
use tokio::sync::mpsc;
use tracing::trace;

/// Latency and loss model of the local network
#[derive(Debug, Clone, Copy)]
pub struct NetworkModel {
    /// Fastest one-way delivery
    pub min_latency: Duration,
    /// Slowest one-way delivery
    pub max_latency: Duration,
    /// Percentage of messages discarded
    pub drop_percent: u8,
    /// Seed of the latency and drop draws
    pub seed: u64,
}

impl NetworkModel {
    /// Instant, lossless delivery
    pub fn perfect() -> Self {
        Self {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            drop_percent: 0,
            seed: 0,
        }
    }
}

/// Message counters
#[derive(Debug, Default)]
pub struct NetworkStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl NetworkStats {
    /// Messages handed to a receiver
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages discarded by the loss model
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Shared {
    inboxes: RwLock<HashMap<PartyId, mpsc::Sender<Envelope>>>,
    model: NetworkModel,
    rng: Mutex<ChaCha8Rng>,
    stats: NetworkStats,
}

/// The set of inboxes of all simulated nodes
#[derive(Clone)]
pub struct LocalNetwork {
    shared: Arc<Shared>,
}

impl LocalNetwork {
    /// Create an empty network
    pub fn new(model: NetworkModel) -> Self {
        Self {
            shared: Arc::new(Shared {
                inboxes: RwLock::new(HashMap::new()),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(model.seed)),
                model,
                stats: NetworkStats::default(),
            }),
        }
    }

    /// Register `party` and return its inbound queue
    pub fn connect(&self, party: PartyId, capacity: usize) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.shared.inboxes.write().insert(party, tx);
        rx
    }

    /// Peer set for `party`
    pub fn peers(&self, party: PartyId) -> LocalPeers {
        LocalPeers {
            party,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Delivery counters
    pub fn stats(&self) -> &NetworkStats {
        &self.shared.stats
    }
}

/// One node's view of the [`LocalNetwork`]
#[derive(Clone)]
pub struct LocalPeers {
    party: PartyId,
    shared: Arc<Shared>,
}

impl LocalPeers {
    /// Draw the fate of one message: `None` drops it
    fn draw_latency(&self) -> Option<Duration> {
        let model = &self.shared.model;
        let mut rng = self.shared.rng.lock();
        if model.drop_percent > 0 && rng.gen_range(0..100u8) < model.drop_percent {
            return None;
        }
        if model.max_latency <= model.min_latency {
            return Some(model.min_latency);
        }
        let min = model.min_latency.as_micros() as u64;
        let max = model.max_latency.as_micros() as u64;
        Some(Duration::from_micros(rng.gen_range(min..=max)))
    }

    fn deliver(&self, inbox: mpsc::Sender<Envelope>, to: PartyId, message: ConsensusMessage) {
        let Some(latency) = self.draw_latency() else {
            self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(from = self.party, to, kind = message.kind(), "Dropped message");
            return;
        };
        let envelope = Envelope::new(self.party, message);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if inbox.send(envelope).await.is_ok() {
                shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

#[async_trait]
impl PeerSet<ConsensusMessage> for LocalPeers {
    async fn broadcast(&self, message: ConsensusMessage) -> PeerResult<()> {
        let targets: Vec<(PartyId, mpsc::Sender<Envelope>)> = {
            let inboxes = self.shared.inboxes.read();
            if inboxes.is_empty() {
                return Err(PeerError::NotRunning);
            }
            inboxes
                .iter()
                .filter(|(party, _)| **party != self.party)
                .map(|(party, tx)| (*party, tx.clone()))
                .collect()
        };
        for (party, inbox) in targets {
            self.deliver(inbox, party, message.clone());
        }
        Ok(())
    }

    async fn send_to(&self, party: PartyId, message: ConsensusMessage) -> PeerResult<()> {
        let inbox = self
            .shared
            .inboxes
            .read()
            .get(&party)
            .cloned()
            .ok_or(PeerError::UnknownParty(party))?;
        self.deliver(inbox, party, message);
        Ok(())
    }

    fn local_party(&self) -> PartyId {
        self.party
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundchain_types::H256;

    fn ping(round: u64) -> ConsensusMessage {
        ConsensusMessage::NotarizedBlockRequest {
            from: 1,
            query: roundchain_consensus::FetchQuery::Hash(H256::keccak256(&round.to_le_bytes())),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let network = LocalNetwork::new(NetworkModel::perfect());
        let mut rx1 = network.connect(1, 8);
        let mut rx2 = network.connect(2, 8);
        let mut rx3 = network.connect(3, 8);

        network.peers(1).broadcast(ping(1)).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap().from, 1);
        assert_eq!(rx3.recv().await.unwrap().from, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx1.try_recv().is_err());
        assert_eq!(network.stats().delivered(), 2);
    }

    #[tokio::test]
    async fn test_send_to_unknown_party() {
        let network = LocalNetwork::new(NetworkModel::perfect());
        let _rx = network.connect(1, 8);
        let err = network.peers(1).send_to(9, ping(1)).await.unwrap_err();
        assert!(matches!(err, PeerError::UnknownParty(9)));
    }

    #[tokio::test]
    async fn test_full_loss_drops_everything() {
        let network = LocalNetwork::new(NetworkModel {
            drop_percent: 100,
            ..NetworkModel::perfect()
        });
        let mut rx2 = network.connect(2, 8);
        let _rx1 = network.connect(1, 8);
        for round in 0..5 {
            network.peers(1).send_to(2, ping(round)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx2.try_recv().is_err());
        assert_eq!(network.stats().dropped(), 5);
    }

    #[tokio::test]
    async fn test_latency_reorders_delivery() {
        let network = LocalNetwork::new(NetworkModel {
            min_latency: Duration::from_millis(1),
            max_latency: Duration::from_millis(40),
            drop_percent: 0,
            seed: 3,
        });
        let _rx1 = network.connect(1, 64);
        let mut rx2 = network.connect(2, 64);
        let peers = network.peers(1);
        for round in 0..32 {
            peers.send_to(2, ping(round)).await.unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..32 {
            received.push(rx2.recv().await.unwrap().message);
        }
        let sent: Vec<ConsensusMessage> = (0..32).map(ping).collect();
        assert_ne!(received, sent);
        assert!(sent.iter().all(|m| received.contains(m)));
    }
}
