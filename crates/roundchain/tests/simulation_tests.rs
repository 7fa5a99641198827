//! End-to-end simulation tests.

use std::io::Write;
use std::time::Duration;

use roundchain::{settings, Simulation};
use roundchain_config::Config;

fn fast_config(nodes: usize, rounds: u64) -> Config {
    let mut config = Config::default();
    config.chain.chain_id = "roundchain-sim-test".into();
    config.consensus.collection_window_ms = 20;
    config.consensus.proposal_retry_ms = 20;
    config.consensus.round_timeout_ms = 500;
    config.consensus.max_block_transactions = 10;
    config.router.retry_base_ms = 5;
    config.router.retry_max_ms = 100;
    config.router.jitter_percent = 0.0;
    config.dkg.network_delta_ms = 10;
    config.dkg.rebroadcast_factor = 5;
    config.dkg.max_rebroadcasts = 40;
    config.simulation.nodes = nodes;
    config.simulation.rounds = rounds;
    config.simulation.min_latency_ms = 1;
    config.simulation.max_latency_ms = 10;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_trusted_dealer_nodes_agree() {
    let mut config = fast_config(4, 4);
    config.dkg.trusted_dealer = true;

    let report = Simulation::new(config)
        .unwrap()
        .with_timeout(Duration::from_secs(30))
        .run()
        .await
        .unwrap();

    assert!(report.agreed());
    let chain = report.common_chain().unwrap();
    let rounds: Vec<u64> = chain.iter().map(|(round, _)| *round).collect();
    assert_eq!(rounds, vec![1, 2, 3, 4]);
    assert_eq!(report.dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dkg_nodes_agree() {
    let config = fast_config(4, 3);

    let report = Simulation::new(config)
        .unwrap()
        .with_timeout(Duration::from_secs(30))
        .run()
        .await
        .unwrap();

    assert!(report.agreed());
    assert_eq!(report.chains.len(), 4);
    assert!(report.delivered > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stake_quorum_nodes_agree() {
    let mut config = fast_config(4, 2);
    config.consensus.quorum_rule = roundchain_config::QuorumRuleKind::Stake;
    config.dkg.trusted_dealer = true;
    config.simulation.seed = 9;

    let report = Simulation::new(config)
        .unwrap()
        .with_timeout(Duration::from_secs(30))
        .run()
        .await
        .unwrap();
    assert!(report.agreed());
}

#[test]
fn test_config_file_drives_engine_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[chain]
chain_id = "from-file"

[consensus]
collection_window_ms = 40
ticket_delivery = "proposer"
quorum_rule = "stake"

[dkg]
threshold_percent = 50

[simulation]
nodes = 6
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    let engine = settings::engine_config(&config);
    assert_eq!(engine.chain_id, "from-file");
    assert_eq!(engine.collection_window, Duration::from_millis(40));
    assert_eq!(settings::quorum_rule(&config.consensus).name(), "stake");
    assert_eq!(settings::dkg_config(&config.dkg, config.simulation.nodes).threshold, 3);
}

#[test]
fn test_generators_beyond_nodes_rejected() {
    let mut config = fast_config(3, 2);
    config.consensus.num_generators = 4;
    assert!(Simulation::new(config).is_err());
}
