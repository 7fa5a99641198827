//! Integration tests for message routing and retry.

mod common;

use std::time::Duration;

use common::{beacon_share, offline_beacon_chain, test_config, TestNode};
use roundchain_consensus::{
    ConsensusMessage, Envelope, MessageRouter, RetryConfig, RouteOutcome, RoundPhase,
};
use roundchain_types::{PartyId, RoundNumber, H256};

fn share_envelope(node: &TestNode, party: PartyId, round: RoundNumber, prev: &H256) -> Envelope {
    Envelope::new(
        party,
        ConsensusMessage::BeaconShare {
            round,
            party_id: party,
            restarts: 0,
            partial_signature: beacon_share(node.identity(party), round, prev),
        },
    )
}

#[tokio::test]
async fn test_early_share_requeued_until_predecessor_beacon() {
    let node = TestNode::new(1, 4, test_config());
    let outputs = offline_beacon_chain(&node.identities, 7);
    let mut router = MessageRouter::new(node.engine.clone(), RetryConfig::fast());

    // Round 7 share arrives before round 6 exists
    let early = share_envelope(&node, 2, 7, &outputs[6]);
    assert_eq!(router.route(early, 0).await, RouteOutcome::Requeued);
    assert_eq!(router.pending(), 1);
    assert!(!node.engine.registry().contains(7));

    // Rounds 1..=6 complete their beacons from external shares, in order
    for round in 1..=6 {
        for party in [2, 3, 4] {
            let envelope = share_envelope(&node, party, round, &outputs[round as usize - 1]);
            assert_eq!(router.route(envelope, 0).await, RouteOutcome::Dispatched);
        }
        let current = node.engine.registry().get(round).unwrap();
        assert_eq!(current.seed(), Some(outputs[round as usize]));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(router.process_due().await, 1);
    assert_eq!(router.pending(), 0);

    let round7 = node.engine.registry().get(7).unwrap();
    assert_eq!(*round7.previous_output(), outputs[6]);
    assert!(round7.lock().beacon().contains(2));
    assert_eq!(round7.phase(), RoundPhase::BeaconPending);

    // Same state as in-order delivery: the remaining shares recover the expected seed
    for party in [3, 4] {
        let envelope = share_envelope(&node, party, 7, &outputs[6]);
        router.route(envelope, 0).await;
    }
    assert_eq!(round7.seed(), Some(outputs[7]));
}

#[tokio::test]
async fn test_in_order_and_reordered_delivery_agree() {
    let ordered = TestNode::new(1, 4, test_config());
    let reordered = TestNode::new(1, 4, test_config());
    let outputs = offline_beacon_chain(&ordered.identities, 3);

    let mut envelopes = Vec::new();
    for round in 1..=3u64 {
        for party in [2, 3, 4] {
            envelopes.push(share_envelope(&ordered, party, round, &outputs[round as usize - 1]));
        }
    }

    let mut in_order = MessageRouter::new(ordered.engine.clone(), RetryConfig::fast());
    for envelope in envelopes.iter().cloned() {
        in_order.route(envelope, 0).await;
    }

    let mut out_of_order = MessageRouter::new(reordered.engine.clone(), RetryConfig::fast());
    for envelope in envelopes.into_iter().rev() {
        out_of_order.route(envelope, 0).await;
    }
    for _ in 0..20 {
        if out_of_order.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        out_of_order.process_due().await;
    }

    assert_eq!(out_of_order.pending(), 0);
    for round in 1..=3 {
        assert_eq!(
            ordered.engine.registry().get(round).unwrap().seed(),
            reordered.engine.registry().get(round).unwrap().seed()
        );
    }
}

#[tokio::test]
async fn test_retry_budget_exhaustion_drops() {
    let node = TestNode::new(1, 4, test_config());
    let outputs = offline_beacon_chain(&node.identities, 9);
    let retry = RetryConfig {
        max_attempts: 2,
        ..RetryConfig::fast()
    };
    let mut router = MessageRouter::new(node.engine.clone(), retry);

    let far = share_envelope(&node, 2, 9, &outputs[8]);
    assert_eq!(router.route(far.clone(), 0).await, RouteOutcome::Requeued);
    assert_eq!(router.route(far.clone(), 1).await, RouteOutcome::Requeued);
    assert_eq!(router.route(far, 2).await, RouteOutcome::Dropped);
}

#[tokio::test]
async fn test_stale_messages_dropped() {
    let node = TestNode::new(1, 4, test_config());
    node.engine.start().await.unwrap();
    for round in 1..=4 {
        node.drive_round(round).await;
    }
    assert_eq!(node.engine.finalized_round(), 3);

    let mut router = MessageRouter::new(node.engine.clone(), RetryConfig::fast());
    let old = share_envelope(&node, 2, 1, &H256::NIL);
    assert_eq!(router.route(old, 0).await, RouteOutcome::Dropped);
    assert_eq!(router.pending(), 0);
}

#[tokio::test]
async fn test_invalid_messages_dropped_without_retry() {
    let node = TestNode::new(1, 4, test_config());
    let mut router = MessageRouter::new(node.engine.clone(), RetryConfig::fast());

    // Share signed over the wrong previous output
    let forged = share_envelope(&node, 2, 1, &H256::keccak256(b"wrong"));
    assert_eq!(router.route(forged, 0).await, RouteOutcome::Dropped);
    assert_eq!(router.pending(), 0);
}
