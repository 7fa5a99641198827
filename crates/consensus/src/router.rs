//! # Message Router
//!
//! Dispatches inbound envelopes to the engine. Before dispatch the router:
//!
//! - drops messages two or more rounds behind the finalized head
//! - advances the round table when a message is for the round after a seeded one
//! - requeues messages whose round (or its predecessor) is not ready yet, with
//!   backoff from a [`RetryScheduler`], until the attempt budget runs out
//!
//! Ordering of the transport is never assumed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::engine::ConsensusEngine;
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::Envelope;
use crate::retry::{RetryConfig, RetryScheduler};

/// What happened to a routed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the engine
    Dispatched,
    /// Will be retried later
    Requeued,
    /// Discarded
    Dropped,
}

/// Inbound message loop for one engine
#[derive(Debug)]
pub struct MessageRouter {
    engine: Arc<ConsensusEngine>,
    retry: RetryScheduler<Envelope>,
}

impl MessageRouter {
    /// Create a router for `engine`
    pub fn new(engine: Arc<ConsensusEngine>, retry: RetryConfig) -> Self {
        Self {
            engine,
            retry: RetryScheduler::new(retry),
        }
    }

    /// The routed engine
    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    /// Envelopes waiting for a retry
    pub fn pending(&self) -> usize {
        self.retry.len()
    }

    /// Deadline of the earliest queued retry
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retry.next_deadline()
    }

    fn check_stale(&self, envelope: &Envelope) -> ConsensusResult<()> {
        let finalized = self.engine.finalized_round();
        match envelope.message.round_number() {
            Some(round) if round.saturating_add(2) <= finalized => {
                Err(ConsensusError::StaleRound { round, finalized })
            }
            _ => Ok(()),
        }
    }

    /// Route one envelope; `attempt` is 0 for fresh arrivals.
    pub async fn route(&mut self, envelope: Envelope, attempt: u32) -> RouteOutcome {
        if let Err(e) = self.check_stale(&envelope) {
            trace!(from = envelope.from, kind = envelope.message.kind(), "Dropping: {}", e);
            return RouteOutcome::Dropped;
        }

        if let Some(round) = envelope.message.round_number() {
            if !self.engine.registry().contains(round) {
                match self.engine.registry().advance(round) {
                    Ok(_) => debug!(round, "Round table advanced by inbound message"),
                    Err(e) if e.is_retryable() => return self.requeue(envelope, attempt, &e),
                    Err(e) => {
                        debug!(round, "Dropping message: {}", e);
                        return RouteOutcome::Dropped;
                    }
                }
            }
        }

        match self.engine.handle_message(envelope.clone()).await {
            Ok(()) => RouteOutcome::Dispatched,
            Err(e) if e.is_retryable() => self.requeue(envelope, attempt, &e),
            Err(e) => {
                debug!(
                    from = envelope.from,
                    kind = envelope.message.kind(),
                    "Message rejected: {}",
                    e
                );
                RouteOutcome::Dropped
            }
        }
    }

    fn requeue(&mut self, envelope: Envelope, attempt: u32, reason: &ConsensusError) -> RouteOutcome {
        let next = attempt + 1;
        let kind = envelope.message.kind();
        let from = envelope.from;
        match self.retry.schedule(envelope, next) {
            Ok(_) => {
                trace!(from, kind, attempt = next, "Requeued: {}", reason);
                RouteOutcome::Requeued
            }
            Err(e) => {
                warn!(from, kind, "Giving up on message ({}): {}", reason, e);
                RouteOutcome::Dropped
            }
        }
    }

    /// Re-route every envelope whose retry deadline has passed. Returns how many were re-routed.
    pub async fn process_due(&mut self) -> usize {
        let due = self.retry.pop_due(Instant::now());
        let count = due.len();
        for (envelope, attempt) in due {
            self.route(envelope, attempt).await;
        }
        count
    }

    /// Route inbound envelopes and due retries until the channel closes.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Envelope>) {
        info!(party_id = self.engine.party_id(), "Message router started");
        loop {
            let deadline = self.retry.next_deadline();
            tokio::select! {
                received = inbound.recv() => match received {
                    Some(envelope) => {
                        self.route(envelope, 0).await;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.process_due().await;
                }
            }
        }
        info!(party_id = self.engine.party_id(), pending = self.retry.len(), "Message router stopped");
    }
}
