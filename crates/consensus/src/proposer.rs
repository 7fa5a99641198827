//! # Block Proposer
//!
//! The `num_generators` best-ranked parties of a round may propose. A proposal
//! extends the block notarized in the previous round, carries the round's seed and
//! the transactions not yet included on its chain, and commits to the state root
//! obtained by applying them to the predecessor's state.
//!
//! When the transaction source yields too few transactions the attempt fails with
//! [`ConsensusError::InsufficientTransactions`] and a later attempt is scheduled.

use std::collections::HashSet;
use std::sync::Arc;

use roundchain_types::{Block, RoundNumber, TxnRef};
use tracing::{debug, error, info, warn};

use crate::engine::ConsensusEngine;
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::ConsensusMessage;
use crate::round::RoundPhase;

impl ConsensusEngine {
    /// Build, sign and broadcast our block for `round`, then ticket it ourselves.
    pub async fn propose(self: &Arc<Self>, round: RoundNumber) -> ConsensusResult<Block> {
        let current = self
            .registry
            .get(round)
            .ok_or(ConsensusError::RoundNotFound(round))?;

        let seed = {
            let state = current.lock();
            if state.phase() != RoundPhase::Verifying {
                return Err(ConsensusError::RoundNotReady {
                    round,
                    phase: state.phase(),
                });
            }
            if let Some(block) = &state.own_proposal {
                return Ok(block.clone());
            }
            let rank = state
                .rank_table
                .as_ref()
                .and_then(|ranks| ranks.rank_of(self.party_id))
                .unwrap_or(usize::MAX);
            if rank >= self.config.num_generators {
                return Err(ConsensusError::NotGenerator {
                    party: self.party_id,
                    round,
                    rank,
                });
            }
            state.seed.ok_or(ConsensusError::RoundNotReady {
                round,
                phase: state.phase(),
            })?
        };

        let prev = self
            .notarized_in(round.saturating_sub(1))
            .ok_or(ConsensusError::RoundNotFound(round.saturating_sub(1)))?;

        // Pending transactions stay pending until finalized, so skip the ones our
        // un-finalized ancestors already carry.
        let ancestors = self.ancestor_transactions(&prev);
        let max = self.config.max_block_transactions;
        let pending = self
            .collaborators
            .transactions
            .take(max.saturating_add(ancestors.len()))
            .await?;

        let transactions: Vec<TxnRef> = {
            let committed = self.committed.lock();
            let mut seen = HashSet::new();
            pending
                .into_iter()
                .filter(|txn| !ancestors.contains(txn) && !committed.contains(txn) && seen.insert(*txn))
                .take(max)
                .collect()
        };

        if transactions.len() < self.config.min_block_transactions {
            return Err(ConsensusError::InsufficientTransactions {
                available: transactions.len(),
                required: self.config.min_block_transactions,
            });
        }

        let state_root = self
            .collaborators
            .state
            .apply(prev.state_root, &transactions)
            .await?;

        let block = Block::new_signed(
            round,
            prev.hash,
            self.party_id,
            seed,
            transactions,
            state_root,
            &self.signing_key,
            &self.domains.proposal,
        );

        {
            let mut state = current.lock();
            // The round may have restarted under a new seed meanwhile.
            if state.phase().is_notarized() || state.seed != Some(seed) {
                return Err(ConsensusError::RoundNotReady {
                    round,
                    phase: state.phase(),
                });
            }
            if let Some(existing) = &state.own_proposal {
                return Ok(existing.clone());
            }
            state.own_proposal = Some(block.clone());
            state.proposals.insert(block.hash, block.clone());
        }

        info!(
            round,
            block_hash = %block.hash.short(),
            txns = block.transactions.len(),
            "Proposing block"
        );

        if let Err(e) = self
            .collaborators
            .peers
            .broadcast(ConsensusMessage::BlockProposal {
                block: block.clone(),
            })
            .await
        {
            error!("Failed to broadcast proposal: {}", e);
        }

        self.issue_ticket(&current, &block).await;
        Ok(block)
    }

    /// Propose for `round`, retrying while transactions are short.
    pub(crate) async fn run_proposer(self: Arc<Self>, round: RoundNumber) {
        loop {
            match self.propose(round).await {
                Ok(_) => return,
                Err(ConsensusError::InsufficientTransactions {
                    available,
                    required,
                }) => {
                    debug!(round, available, required, "Not enough transactions, retrying later");
                }
                // Notarized, or restarted; a restart clears `proposing` itself.
                Err(ConsensusError::RoundNotReady { .. }) => return,
                Err(e) => {
                    warn!(round, "Proposal failed: {}", e);
                    self.clear_proposing(round);
                    return;
                }
            }

            tokio::time::sleep(self.config.proposal_retry).await;
            let still_open = self
                .registry
                .get(round)
                .map(|r| r.phase() == RoundPhase::Verifying)
                .unwrap_or(false);
            if !still_open {
                return;
            }
        }
    }

    fn clear_proposing(&self, round: RoundNumber) {
        if let Some(current) = self.registry.get(round) {
            current.lock().proposing = false;
        }
    }

    /// Transactions carried by `tip` and its ancestors above the finalized head.
    pub(crate) fn ancestor_transactions(&self, tip: &Block) -> HashSet<TxnRef> {
        let finalized = self.registry.finalized_round();
        let index = self.index.lock();
        let mut included = HashSet::new();
        let mut cursor = Some(tip);
        while let Some(block) = cursor {
            if block.round <= finalized {
                break;
            }
            included.extend(block.transactions.iter().copied());
            cursor = index.get(&block.prev_hash).map(|(b, _)| b);
        }
        included
    }
}
