//! Peer messaging trait.
//!
//! Transport, encoding and authentication live behind this trait; the engine only
//! sees typed messages addressed by party id.

use async_trait::async_trait;
use roundchain_types::PartyId;
use thiserror::Error;

/// Errors that can occur while sending to peers.
#[derive(Error, Debug)]
pub enum PeerError {
    /// The party is not part of the peer set.
    #[error("unknown party: {0}")]
    UnknownParty(PartyId),

    /// The message could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The network is not running.
    #[error("network not running")]
    NotRunning,
}

/// Result type for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// The fixed set of consensus participants, reachable by party id.
#[async_trait]
pub trait PeerSet<M>: Send + Sync + 'static
where
    M: Clone + Send + Sync + 'static,
{
    /// Send a message to every other participant.
    async fn broadcast(&self, message: M) -> PeerResult<()>;

    /// Send a message to one participant.
    async fn send_to(&self, party: PartyId, message: M) -> PeerResult<()>;

    /// Party id of the local node.
    fn local_party(&self) -> PartyId;
}
