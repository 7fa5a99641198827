//! Tests for Config module

use roundchain_config::{
    BackoffKind, ChainConfig, Config, ConfigError, ConsensusConfig, DkgConfig, LoggingConfig,
    QuorumRuleKind, RouterConfig, SimulationConfig, TicketDelivery,
};
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.chain.chain_id, "roundchain-devnet");
    assert_eq!(config.consensus.collection_window_ms, 300);
    assert_eq!(config.consensus.num_generators, 1);
    assert_eq!(config.consensus.quorum_rule, QuorumRuleKind::Count);
    assert_eq!(
        (config.consensus.quorum_numerator, config.consensus.quorum_denominator),
        (2, 3)
    );
    assert_eq!(config.dkg.threshold_percent, 67);
    assert_eq!(config.router.backoff, BackoffKind::Exponential);
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_toml_uses_defaults() {
    let config = Config::from_str("").unwrap();
    assert_eq!(config.simulation.nodes, 4);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_partial_section_fills_defaults() {
    let config = Config::from_str(
        r#"
        [consensus]
        collection_window_ms = 50
        ticket_delivery = "proposer"
        quorum_rule = "stake"

        [router]
        backoff = "linear"
        "#,
    )
    .unwrap();

    assert_eq!(config.consensus.collection_window(), Duration::from_millis(50));
    assert_eq!(config.consensus.ticket_delivery, TicketDelivery::Proposer);
    assert_eq!(config.consensus.quorum_rule, QuorumRuleKind::Stake);
    assert_eq!(config.consensus.round_timeout_ms, 2000);
    assert_eq!(config.router.backoff, BackoffKind::Linear);
    assert_eq!(config.router.max_attempts, 8);
}

#[test]
fn test_invalid_toml() {
    assert!(matches!(
        Config::from_str("[consensus\nfoo = 1"),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_empty_chain_id() {
    let config = ChainConfig {
        chain_id: "  ".to_string(),
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidChainId)));
}

#[test]
fn test_zero_collection_window() {
    let config = ConsensusConfig {
        collection_window_ms: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTimeout {
            name: "collection_window_ms",
            value: 0
        })
    ));
}

#[test]
fn test_invalid_quorum_fraction() {
    for (numerator, denominator) in [(0, 3), (4, 3), (1, 0)] {
        let config = ConsensusConfig {
            quorum_numerator: numerator,
            quorum_denominator: denominator,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidQuorum { .. })
        ));
    }

    let unanimous = ConsensusConfig {
        quorum_numerator: 1,
        quorum_denominator: 1,
        ..Default::default()
    };
    assert!(unanimous.validate().is_ok());
}

#[test]
fn test_invalid_block_size() {
    let config = ConsensusConfig {
        min_block_transactions: 10,
        max_block_transactions: 5,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidBlockSize { min: 10, max: 5 })
    ));
}

#[test]
fn test_zero_committed_retention() {
    let config = ConsensusConfig {
        committed_retention_rounds: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroCount {
            name: "committed_retention_rounds"
        })
    ));
    assert_eq!(ConsensusConfig::default().committed_retention_rounds, 256);
}

#[test]
fn test_invalid_threshold_percent() {
    let config = DkgConfig {
        threshold_percent: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(0))));

    let config = DkgConfig {
        threshold_percent: 101,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(101))));
}

#[test]
fn test_rebroadcast_interval() {
    let config = DkgConfig::default();
    assert_eq!(config.rebroadcast_interval(), Duration::from_millis(1000));
}

#[test]
fn test_router_validation() {
    let config = RouterConfig {
        retry_base_ms: 100,
        retry_max_ms: 50,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRetryRange { base: 100, max: 50 })
    ));

    let config = RouterConfig {
        jitter_percent: 1.5,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidJitter(_))));

    let config = RouterConfig {
        max_attempts: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroCount { name: "max_attempts" })
    ));
}

#[test]
fn test_logging_validation() {
    let config = LoggingConfig {
        level: "verbose".to_string(),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLogLevel(_))));

    let config = LoggingConfig {
        format: "pretty".to_string(),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLogFormat(_))));

    let config = LoggingConfig {
        level: "DEBUG".to_string(),
        format: "JSON".to_string(),
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_simulation_validation() {
    let config = SimulationConfig {
        nodes: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::TooFewParticipants { required: 1, actual: 0 })
    ));

    let config = SimulationConfig {
        min_latency_ms: 50,
        max_latency_ms: 10,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidLatencyRange { min: 50, max: 10 })
    ));

    let config = SimulationConfig {
        drop_percent: 120,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidPercentage { name: "drop_percent", value: 120 })
    ));
}

#[test]
fn test_generators_exceed_nodes() {
    let mut config = Config::default();
    config.consensus.num_generators = 5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::TooFewParticipants { required: 5, actual: 4 })
    ));
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundchain.toml");

    let mut config = Config::default();
    config.chain.chain_id = "testnet-7".to_string();
    config.consensus.retained_rounds = 9;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.chain.chain_id, "testnet-7");
    assert_eq!(loaded.consensus.retained_rounds, 9);
    assert_eq!(loaded.router.jitter_percent, config.router.jitter_percent);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead { .. })));
}
