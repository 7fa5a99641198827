//! # Notarizer and Finalizer
//!
//! Tickets accumulate per round until one block reaches the quorum rule. The round
//! then moves to `Notarized` exactly once, the next round starts, and the chain
//! behind the notarized block is finalized up to the previous round.
//!
//! Finality lags notarization by one round: a block becomes permanent only after a
//! successor extending it has been notarized.

use std::sync::Arc;

use roundchain_types::{Block, RoundNumber};
use tracing::{debug, error, info, warn};

use crate::engine::{BoxFuture, ConsensusEngine};
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::{ConsensusMessage, FetchQuery};
use crate::rank::RankTable;
use crate::round::{Round, RoundPhase};
use crate::ticket_set::TicketSet;
use crate::types::{Notarization, VerificationTicket};

impl ConsensusEngine {
    /// Count a ticket received from a peer.
    pub async fn on_ticket(self: &Arc<Self>, ticket: VerificationTicket) -> ConsensusResult<()> {
        let round = ticket.round;
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;
        let phase = current.phase();
        if phase.is_notarized() {
            return Ok(());
        }
        if phase < RoundPhase::Verifying {
            return Err(ConsensusError::RoundNotReady { round, phase });
        }
        self.record_ticket(current, ticket).await
    }

    /// Add a ticket to its round; notarize when the quorum rule is met.
    pub(crate) async fn record_ticket(
        self: &Arc<Self>,
        current: Arc<Round>,
        ticket: VerificationTicket,
    ) -> ConsensusResult<()> {
        let block_hash = ticket.block_hash;
        let reached = {
            let mut state = current.lock();
            if state.phase().is_notarized() {
                return Ok(());
            }
            let outcome = state.tickets.add_ticket(
                ticket,
                &self.participants,
                self.quorum.as_ref(),
                &self.domains.ticket,
            )?;
            if !outcome.quorum_reached {
                None
            } else {
                let block = state.proposals.get(&block_hash).cloned();
                let notarization = state.tickets.notarization_for(&block_hash);
                let first_request = block.is_none() && state.requested.insert(block_hash);
                Some((block, notarization, first_request))
            }
        };

        match reached {
            Some((Some(block), Some(notarization), _)) => {
                self.notarize(current, block, notarization, true).await;
            }
            Some((None, Some(notarization), first_request)) => {
                debug!(
                    round = current.number(),
                    block_hash = %block_hash.short(),
                    "Quorum for unseen block, fetching"
                );
                current.lock().pending_notarization.get_or_insert(notarization);
                if first_request {
                    self.request_block(FetchQuery::Hash(block_hash)).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Adopt a notarization announced by a peer.
    pub async fn on_notarization(self: &Arc<Self>, notarization: Notarization) -> ConsensusResult<()> {
        let round = notarization.round;
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;
        if current.phase().is_notarized() {
            return Ok(());
        }
        self.check_notarization(&notarization)?;

        let block = {
            let mut state = current.lock();
            match state.proposals.get(&notarization.block_hash).cloned() {
                Some(block) => Some(block),
                None => {
                    state.pending_notarization = Some(notarization.clone());
                    None
                }
            }
        };
        let block = match block {
            Some(block) => Some(block),
            None => self.index.lock().get(&notarization.block_hash).map(|(b, _)| b.clone()),
        };

        match block {
            Some(block) => {
                self.notarize(current, block, notarization, false).await;
            }
            None => {
                debug!(
                    round,
                    block_hash = %notarization.block_hash.short(),
                    "Notarized block unknown, fetching"
                );
                let first_request = current.lock().requested.insert(notarization.block_hash);
                if first_request {
                    self.request_block(FetchQuery::Hash(notarization.block_hash)).await;
                }
            }
        }
        Ok(())
    }

    /// Adopt a notarized block served in response to a fetch request.
    pub async fn on_notarized_block(
        self: &Arc<Self>,
        block: Block,
        notarization: Notarization,
    ) -> ConsensusResult<()> {
        if block.is_genesis() {
            return Ok(());
        }
        if notarization.block_hash != block.hash {
            return Err(ConsensusError::InvalidBlock(
                "notarization does not cover the served block".into(),
            ));
        }
        if notarization.round != block.round {
            return Err(ConsensusError::RoundMismatch {
                expected: block.round,
                actual: notarization.round,
            });
        }
        if block.round <= self.finalized_round() {
            return Ok(());
        }
        block.validate_hash()?;
        let proposer = self.participants.get(block.proposer_id).ok_or_else(|| {
            ConsensusError::InvalidSignature(format!("unknown proposer {}", block.proposer_id))
        })?;
        if !block.verify_signature(&proposer.signing_key, &self.domains.proposal) {
            return Err(ConsensusError::InvalidSignature(format!(
                "served block from {} does not verify",
                block.proposer_id
            )));
        }
        self.check_notarization(&notarization)?;

        let current = self
            .registry
            .get(block.round)
            .ok_or(ConsensusError::RoundNotFound(block.round))?;
        self.notarize(current, block, notarization, false).await;
        Ok(())
    }

    fn check_notarization(&self, notarization: &Notarization) -> ConsensusResult<()> {
        let valid = TicketSet::verify_notarization(
            notarization,
            &self.participants,
            self.quorum.as_ref(),
            &self.domains.ticket,
        )?;
        if !valid {
            warn!(
                round = notarization.round,
                tickets = notarization.tickets.len(),
                "Notarization below quorum"
            );
            return Err(ConsensusError::InvalidBlock(format!(
                "notarization for round {} is below quorum",
                notarization.round
            )));
        }
        Ok(())
    }

    /// Move `current` to `Notarized`, start the next round and finalize behind it.
    ///
    /// Only the first call per round has any effect.
    pub(crate) fn notarize(
        self: &Arc<Self>,
        current: Arc<Round>,
        block: Block,
        notarization: Notarization,
        announce: bool,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let round = current.number();
            let notarized = {
                let mut state = current.lock();
                match state.seed {
                    Some(seed) if seed == block.random_seed => {}
                    Some(_) if state.restarts() > 0 => {
                        // The quorum settled on another attempt of this round.
                        let ranks = RankTable::compute(&block.random_seed, &self.participants);
                        state.reseed(block.random_seed, ranks);
                    }
                    Some(_) => {
                        warn!(round, block_hash = %block.hash.short(), "Notarized block seed mismatch");
                        return;
                    }
                    None => {
                        // Catch-up: the quorum vouches for the seed.
                        let ranks = RankTable::compute(&block.random_seed, &self.participants);
                        state.set_seed(block.random_seed, ranks);
                    }
                }
                state.try_notarize(block.clone(), notarization.clone())
            };
            if !notarized {
                return;
            }

            self.index
                .lock()
                .insert(block.hash, (block.clone(), notarization.clone()));
            info!(
                round,
                block_hash = %block.hash.short(),
                proposer = block.proposer_id,
                tickets = notarization.tickets.len(),
                "Notarized block"
            );

            if announce {
                if let Err(e) = self
                    .collaborators
                    .peers
                    .broadcast(ConsensusMessage::Notarization(notarization))
                    .await
                {
                    error!("Failed to broadcast notarization: {}", e);
                }
            }

            let prev_known = match self.lookup_block(&block.prev_hash).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    error!(round, "Block lookup failed: {}", e);
                    false
                }
            };
            if !prev_known {
                self.request_block(FetchQuery::Hash(block.prev_hash)).await;
            }

            if self
                .registry
                .discard_stale_successor(round, Some(&block.random_seed))
            {
                debug!(round = round + 1, "Successor was chained to an abandoned seed");
            }
            self.start_round(round + 1).await;
            self.advance_finality(round).await;
        })
    }

    /// Finalize every block behind the newest notarized tip reachable from `round`.
    async fn advance_finality(self: &Arc<Self>, round: RoundNumber) {
        let _guard = self.finalize_lock.lock().await;

        let mut tip_round = round;
        while self
            .registry
            .get(tip_round + 1)
            .map(|r| r.phase().is_notarized())
            .unwrap_or(false)
        {
            tip_round += 1;
        }
        let Some(tip) = self.notarized_in(tip_round) else {
            return;
        };

        let finalized = self.finalized_round();
        let head = *self.finalized_head.lock();
        let mut chain = Vec::new();
        let mut cursor = tip.prev_hash;
        let anchored = {
            let index = self.index.lock();
            loop {
                if cursor == head {
                    break true;
                }
                match index.get(&cursor) {
                    Some((block, _)) if block.round > finalized => {
                        chain.push(block.clone());
                        cursor = block.prev_hash;
                    }
                    Some(_) => break false,
                    // Gap; retried once the missing block is notarized.
                    None => return,
                }
            }
        };
        if !anchored {
            error!(
                tip = tip_round,
                head = %head.short(),
                "Notarized chain does not extend the finalized head"
            );
            return;
        }

        for block in chain.into_iter().rev() {
            if let Err(e) = self.finalize_block(block).await {
                error!("Finalization failed: {}", e);
                return;
            }
        }
    }

    /// Finalize one block. The round only turns terminal after every collaborator
    /// accepted it, so a failed write is retried by the next walk.
    async fn finalize_block(self: &Arc<Self>, block: Block) -> ConsensusResult<()> {
        let round = block.round;
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;
        {
            let state = current.lock();
            let matches = state
                .notarized
                .as_ref()
                .map(|n| n.hash == block.hash)
                .unwrap_or(false);
            if !matches {
                return Err(ConsensusError::InvalidBlock(format!(
                    "round {} notarized a different block",
                    round
                )));
            }
            if state.phase() == RoundPhase::Finalized {
                return Ok(());
            }
        }

        self.collaborators
            .transactions
            .mark_committed(&block.transactions)
            .await?;
        self.collaborators.store.write(&block).await?;

        if !current.lock().try_finalize() {
            return Ok(());
        }
        self.committed.lock().insert(round, &block.transactions);
        self.registry.set_finalized(round);
        *self.finalized_head.lock() = block.hash;

        info!(
            round,
            block_hash = %block.hash.short(),
            txns = block.transactions.len(),
            "FINALIZED block"
        );
        self.collaborators
            .observer
            .on_round_finalized(round, &block)
            .await;

        self.committed
            .lock()
            .prune_below((round + 1).saturating_sub(self.config.committed_retention));
        let retained = self.config.retained_rounds;
        let removed = self.registry.drop_below(round.saturating_sub(retained));
        if removed > 0 {
            let head = block.hash;
            self.index
                .lock()
                .retain(|hash, (b, _)| *hash == head || b.round + retained >= round);
        }
        Ok(())
    }
}
