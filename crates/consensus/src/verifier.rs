//! # Block Verifier
//!
//! Proposals are buffered for the collection window, then verified in ascending
//! proposer rank until one passes. A block passes when it extends the notarized
//! predecessor, carries the round seed, includes no transaction already on its chain
//! and commits to the state root its transactions produce.
//!
//! Each round issues at most one ticket. A better-ranked block that arrives after the
//! ticket was sent is buffered but never switched to.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use roundchain_types::{Block, PartyId, RoundNumber, H256};
use tracing::{debug, error, info, warn};

use crate::engine::{ConsensusEngine, TicketDelivery};
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::{ConsensusMessage, FetchQuery};
use crate::round::{Round, RoundPhase};
use crate::types::{Notarization, VerificationTicket};

enum ProposalAction {
    Nothing,
    Verify { first: bool },
    Notarize {
        notarization: Notarization,
        announce: bool,
    },
}

impl ConsensusEngine {
    /// Buffer a proposal for verification.
    pub async fn on_proposal(self: &Arc<Self>, block: Block) -> ConsensusResult<()> {
        let round = block.round;
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;

        if block.is_genesis() {
            return Err(ConsensusError::InvalidBlock("genesis cannot be proposed".into()));
        }
        let proposer = self.participants.get(block.proposer_id).ok_or_else(|| {
            ConsensusError::InvalidSignature(format!("unknown proposer {}", block.proposer_id))
        })?;
        block.validate_hash()?;
        if !block.verify_signature(&proposer.signing_key, &self.domains.proposal) {
            warn!(round, proposer = block.proposer_id, "Invalid proposal signature");
            return Err(ConsensusError::InvalidSignature(format!(
                "proposal from {} does not verify",
                block.proposer_id
            )));
        }

        let next = self.buffer_proposal(&current, &block)?;
        match next {
            ProposalAction::Nothing => {}
            ProposalAction::Verify { first } => {
                // Only the first proposal waits out the full window.
                let window = if first {
                    self.config.collection_window
                } else {
                    Duration::ZERO
                };
                self.spawn_verification(&current, window);
            }
            ProposalAction::Notarize {
                notarization,
                announce,
            } => {
                self.notarize(current, block, notarization, announce).await;
            }
        }
        Ok(())
    }

    fn buffer_proposal(&self, current: &Round, block: &Block) -> ConsensusResult<ProposalAction> {
        let round = block.round;
        let mut state = current.lock();

        // A notarization may have arrived before the block itself.
        if let Some(pending) = state.pending_notarization.take() {
            if pending.block_hash == block.hash {
                return Ok(ProposalAction::Notarize {
                    notarization: pending,
                    announce: false,
                });
            }
            state.pending_notarization = Some(pending);
        }

        if state.phase().is_notarized() {
            return Ok(ProposalAction::Nothing);
        }
        if state.phase() < RoundPhase::Verifying {
            return Err(ConsensusError::RoundNotReady {
                round,
                phase: state.phase(),
            });
        }

        if let Some(seed) = state.seed {
            if seed != block.random_seed {
                warn!(round, proposer = block.proposer_id, "Proposal seed mismatch");
                return Err(ConsensusError::SeedMismatch {
                    round,
                    expected: seed,
                    actual: block.random_seed,
                });
            }
        }
        let rank = state
            .rank_table
            .as_ref()
            .and_then(|ranks| ranks.rank_of(block.proposer_id))
            .unwrap_or(usize::MAX);
        if rank >= self.config.num_generators {
            return Err(ConsensusError::NotGenerator {
                party: block.proposer_id,
                round,
                rank,
            });
        }

        if state.proposals.contains_key(&block.hash) {
            return Ok(ProposalAction::Nothing);
        }
        debug!(
            round,
            proposer = block.proposer_id,
            rank,
            block_hash = %block.hash.short(),
            "Buffered proposal"
        );
        state.proposals.insert(block.hash, block.clone());

        if state
            .tickets
            .has_quorum_for(&block.hash, &self.participants, self.quorum.as_ref())
        {
            return Ok(match state.tickets.notarization_for(&block.hash) {
                Some(notarization) => ProposalAction::Notarize {
                    notarization,
                    announce: true,
                },
                None => ProposalAction::Nothing,
            });
        }
        if !state.verifier_running && state.ticket_sent.is_none() {
            return Ok(ProposalAction::Verify {
                first: state.proposal_count() == 1,
            });
        }
        Ok(ProposalAction::Nothing)
    }

    /// Start a verification task for `round` after `delay`.
    pub(crate) fn spawn_verification(self: &Arc<Self>, current: &Arc<Round>, delay: Duration) {
        let mut state = current.lock();
        if state.verifier_running || state.ticket_sent.is_some() || state.phase().is_notarized() {
            return;
        }
        state.verifier_running = true;
        let this = Arc::clone(self);
        let round = current.number();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.run_verification(round).await;
        });
        state.verification = Some(handle);
    }

    /// Verify buffered candidates best rank first; ticket the first valid one.
    async fn run_verification(self: &Arc<Self>, round: RoundNumber) {
        let Some(current) = self.registry.get(round) else {
            return;
        };
        let mut tried: HashSet<H256> = HashSet::new();

        loop {
            let candidates: Vec<Block> = {
                let mut state = current.lock();
                if state.phase().is_notarized() || state.ticket_sent.is_some() {
                    state.verifier_running = false;
                    return;
                }
                let fresh: Vec<Block> = state
                    .candidates_by_rank()
                    .into_iter()
                    .filter(|block| !tried.contains(&block.hash))
                    .collect();
                if fresh.is_empty() {
                    state.verifier_running = false;
                    return;
                }
                fresh
            };

            for block in candidates {
                tried.insert(block.hash);
                match self.verify_block(&block).await {
                    Ok(()) => {
                        self.issue_ticket(&current, &block).await;
                        return;
                    }
                    Err(ConsensusError::UnknownPredecessor(prev)) => {
                        debug!(round, block_hash = %block.hash.short(), "Predecessor unknown, fetching");
                        let first_request = current.lock().requested.insert(prev);
                        if first_request {
                            self.request_block(FetchQuery::Hash(prev)).await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            round,
                            proposer = block.proposer_id,
                            block_hash = %block.hash.short(),
                            "Rejected block: {}",
                            e
                        );
                        current.lock().rejected.insert(block.hash);
                    }
                }
            }
        }
    }

    /// Full validity check of a candidate block.
    pub async fn verify_block(&self, block: &Block) -> ConsensusResult<()> {
        let round = block.round;
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;

        let seed = current.seed().ok_or(ConsensusError::RoundNotReady {
            round,
            phase: current.phase(),
        })?;
        if seed != block.random_seed {
            return Err(ConsensusError::SeedMismatch {
                round,
                expected: seed,
                actual: block.random_seed,
            });
        }

        let proposer = self.participants.get(block.proposer_id).ok_or_else(|| {
            ConsensusError::InvalidSignature(format!("unknown proposer {}", block.proposer_id))
        })?;
        if !block.verify_signature(&proposer.signing_key, &self.domains.proposal) {
            return Err(ConsensusError::InvalidSignature(format!(
                "proposal from {} does not verify",
                block.proposer_id
            )));
        }
        block.validate_hash()?;

        let prev = self
            .lookup_block(&block.prev_hash)
            .await?
            .ok_or(ConsensusError::UnknownPredecessor(block.prev_hash))?;
        if prev.round + 1 != round {
            return Err(ConsensusError::InvalidBlock(format!(
                "predecessor {} is from round {}, expected {}",
                prev.hash.short(),
                prev.round,
                round.saturating_sub(1)
            )));
        }
        if let Some(notarized) = self.notarized_in(prev.round) {
            if notarized.hash != prev.hash {
                return Err(ConsensusError::InvalidBlock(format!(
                    "predecessor {} is not the block notarized in round {}",
                    prev.hash.short(),
                    prev.round
                )));
            }
        }

        let mut seen = HashSet::new();
        for txn in &block.transactions {
            if !seen.insert(*txn) {
                return Err(ConsensusError::DuplicateTransaction(*txn));
            }
        }
        let ancestors = self.ancestor_transactions(&prev);
        {
            let committed = self.committed.lock();
            if let Some(txn) = block
                .transactions
                .iter()
                .find(|txn| ancestors.contains(txn) || committed.contains(txn))
            {
                return Err(ConsensusError::DuplicateTransaction(*txn));
            }
        }

        let state_root = self
            .collaborators
            .state
            .apply(prev.state_root, &block.transactions)
            .await?;
        if state_root != block.state_root {
            return Err(ConsensusError::InvalidBlock(format!(
                "state root mismatch: block {}, computed {}",
                block.state_root.short(),
                state_root.short()
            )));
        }
        Ok(())
    }

    /// Sign and deliver this round's only ticket, then count it locally.
    pub(crate) async fn issue_ticket(self: &Arc<Self>, current: &Arc<Round>, block: &Block) {
        let round = current.number();
        let ticket = VerificationTicket::sign(
            block.hash,
            round,
            self.party_id,
            &self.signing_key,
            &self.domains.ticket,
        );
        {
            let mut state = current.lock();
            state.verifier_running = false;
            // Our ticket may complete the quorum, and notarizing aborts the stored
            // verification task, which can be the one running this call.
            state.verification.take();
            if state.ticket_sent.is_some()
                || state.phase().is_notarized()
                || state.seed != Some(block.random_seed)
            {
                return;
            }
            state.ticket_sent = Some(block.hash);
            state.own_tickets.push((ticket.clone(), block.proposer_id));
        }

        info!(
            round,
            block_hash = %block.hash.short(),
            proposer = block.proposer_id,
            "Issuing verification ticket"
        );
        self.deliver_ticket(ticket.clone(), block.proposer_id).await;

        if let Err(e) = self.record_ticket(Arc::clone(current), ticket).await {
            error!(round, "Own ticket rejected: {}", e);
        }
    }

    /// Send a ticket according to the delivery mode.
    pub(crate) async fn deliver_ticket(&self, ticket: VerificationTicket, proposer: PartyId) {
        let peers = &self.collaborators.peers;
        let result = match self.config.ticket_delivery {
            TicketDelivery::Broadcast => peers.broadcast(ConsensusMessage::VerificationTicket(ticket)).await,
            TicketDelivery::Proposer if proposer == self.party_id => Ok(()),
            TicketDelivery::Proposer => {
                peers
                    .send_to(proposer, ConsensusMessage::VerificationTicket(ticket))
                    .await
            }
        };
        if let Err(e) = result {
            error!("Failed to send verification ticket: {}", e);
        }
    }
}
