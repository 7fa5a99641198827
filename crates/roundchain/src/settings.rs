//! Conversion from the file configuration to the engine's parameter types.

use std::sync::Arc;
use std::time::Duration;

use roundchain_config::{
    BackoffKind, Config, ConsensusConfig, DkgConfig as DkgSection, QuorumRuleKind, RouterConfig,
    TicketDelivery as TicketDeliverySetting,
};
use roundchain_consensus::{
    BackoffMode, CountQuorum, DkgConfig, EngineConfig, QuorumRule, RetryConfig, StakeQuorum,
    TicketDelivery,
};

use crate::network::NetworkModel;

/// Threshold `t = ceil(n * percent / 100)`, at least 1 and at most `n`
pub fn threshold_from_percent(participants: usize, percent: u8) -> usize {
    let scaled = participants * usize::from(percent);
    scaled.div_ceil(100).clamp(1, participants.max(1))
}

/// Engine parameters from `[chain]` and `[consensus]`
pub fn engine_config(config: &Config) -> EngineConfig {
    let consensus = &config.consensus;
    EngineConfig {
        chain_id: config.chain.chain_id.clone(),
        collection_window: consensus.collection_window(),
        num_generators: consensus.num_generators,
        ticket_delivery: match consensus.ticket_delivery {
            TicketDeliverySetting::Broadcast => TicketDelivery::Broadcast,
            TicketDeliverySetting::Proposer => TicketDelivery::Proposer,
        },
        min_block_transactions: consensus.min_block_transactions,
        max_block_transactions: consensus.max_block_transactions,
        proposal_retry: consensus.proposal_retry(),
        round_timeout: consensus.round_timeout(),
        max_soft_timeouts: consensus.max_soft_timeouts,
        retained_rounds: consensus.retained_rounds,
        committed_retention: consensus.committed_retention_rounds,
        verify_beacon_shares: consensus.verify_beacon_shares,
        ..EngineConfig::default()
    }
}

/// Quorum rule selected by `[consensus].quorum_rule`
pub fn quorum_rule(consensus: &ConsensusConfig) -> Arc<dyn QuorumRule> {
    let (numerator, denominator) = (consensus.quorum_numerator, consensus.quorum_denominator);
    match consensus.quorum_rule {
        QuorumRuleKind::Count => Arc::new(CountQuorum::new(numerator, denominator)),
        QuorumRuleKind::Stake => Arc::new(StakeQuorum::new(numerator, denominator)),
    }
}

/// Router backoff from `[router]`
pub fn retry_config(router: &RouterConfig) -> RetryConfig {
    let mode = match router.backoff {
        BackoffKind::Linear => BackoffMode::Linear,
        BackoffKind::Exponential => BackoffMode::exponential(),
    };
    RetryConfig::new(
        Duration::from_millis(router.retry_base_ms),
        Duration::from_millis(router.retry_max_ms),
        router.max_attempts,
    )
    .with_backoff_mode(mode)
    .with_jitter(router.jitter_percent)
}

/// DKG parameters for `participants` parties from `[dkg]`
pub fn dkg_config(dkg: &DkgSection, participants: usize) -> DkgConfig {
    DkgConfig {
        threshold: threshold_from_percent(participants, dkg.threshold_percent),
        require_all_shares: dkg.require_all_shares,
        verify_shares: dkg.verify_shares,
        rebroadcast_interval: dkg.rebroadcast_interval(),
        max_rebroadcasts: dkg.max_rebroadcasts,
    }
}

/// Local network model from `[simulation]`
pub fn network_model(config: &Config) -> NetworkModel {
    let simulation = &config.simulation;
    NetworkModel {
        min_latency: Duration::from_millis(simulation.min_latency_ms),
        max_latency: Duration::from_millis(simulation.max_latency_ms),
        drop_percent: simulation.drop_percent,
        seed: simulation.seed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rounds_up() {
        assert_eq!(threshold_from_percent(4, 67), 3);
        assert_eq!(threshold_from_percent(3, 67), 3);
        assert_eq!(threshold_from_percent(10, 50), 5);
        assert_eq!(threshold_from_percent(7, 1), 1);
        assert_eq!(threshold_from_percent(5, 100), 5);
    }

    #[test]
    fn test_engine_config_carries_consensus_section() {
        let mut config = Config::default();
        config.chain.chain_id = "sim".into();
        config.consensus.collection_window_ms = 25;
        config.consensus.ticket_delivery = TicketDeliverySetting::Proposer;

        let engine = engine_config(&config);
        assert_eq!(engine.chain_id, "sim");
        assert_eq!(engine.collection_window, Duration::from_millis(25));
        assert_eq!(engine.ticket_delivery, TicketDelivery::Proposer);
        assert_eq!(engine.retained_rounds, config.consensus.retained_rounds);
        assert_eq!(engine.committed_retention, 256);
    }

    #[test]
    fn test_dkg_interval_scales_network_delta() {
        let mut section = DkgSection::default();
        section.network_delta_ms = 10;
        section.rebroadcast_factor = 5;
        let dkg = dkg_config(&section, 4);
        assert_eq!(dkg.rebroadcast_interval, Duration::from_millis(50));
        assert_eq!(dkg.threshold, 3);
    }

    #[test]
    fn test_quorum_rule_selection() {
        let mut consensus = ConsensusConfig::default();
        assert_eq!(quorum_rule(&consensus).name(), "count");
        consensus.quorum_rule = QuorumRuleKind::Stake;
        assert_eq!(quorum_rule(&consensus).name(), "stake");
    }
}
