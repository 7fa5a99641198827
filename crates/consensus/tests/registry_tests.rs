//! Integration tests for the round registry.

use std::sync::Arc;

use roundchain_consensus::{ConsensusError, RoundPhase, RoundRegistry};
use roundchain_types::{Block, H256};

fn registry() -> (RoundRegistry, Block) {
    let genesis = Block::genesis(H256::keccak256(b"genesis-beacon"), H256::NIL);
    (RoundRegistry::new(genesis.clone()), genesis)
}

#[test]
fn test_genesis_round_is_finalized() {
    let (registry, genesis) = registry();
    let round = registry.get(0).unwrap();
    assert_eq!(round.phase(), RoundPhase::Finalized);
    assert_eq!(round.notarized_block(), Some(genesis));
    assert_eq!(registry.finalized_round(), 0);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_advance_chains_to_predecessor_output() {
    let (registry, genesis) = registry();
    let round1 = registry.advance(1).unwrap();
    assert_eq!(round1.number(), 1);
    assert_eq!(*round1.previous_output(), genesis.random_seed);
    assert_eq!(round1.phase(), RoundPhase::Created);

    // Idempotent
    let again = registry.advance(1).unwrap();
    assert!(Arc::ptr_eq(&round1, &again));
}

#[test]
fn test_advance_requires_predecessor() {
    let (registry, _) = registry();
    let err = registry.advance(3).unwrap_err();
    assert!(matches!(err, ConsensusError::RoundNotFound(2)));
    assert!(err.is_retryable());
}

#[test]
fn test_advance_requires_predecessor_beacon() {
    let (registry, _) = registry();
    registry.advance(1).unwrap();
    let err = registry.advance(2).unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::RoundNotReady {
            round: 1,
            phase: RoundPhase::Created
        }
    ));
    assert!(err.is_retryable());
}

#[test]
fn test_discard_stale_successor() {
    let (registry, genesis) = registry();
    registry.advance(1).unwrap();
    let (stale, _) = registry.get_or_create(2, H256::keccak256(b"abandoned seed"));

    // Still chained to the output round 1 holds
    let output = *stale.previous_output();
    assert!(!registry.discard_stale_successor(1, Some(&output)));
    assert!(registry.contains(2));

    assert!(registry.discard_stale_successor(1, None));
    assert!(!registry.contains(2));
    assert!(!registry.discard_stale_successor(1, None));

    // The genesis successor chains to the genesis output
    assert!(!registry.discard_stale_successor(0, Some(&genesis.random_seed)));
    assert!(registry.contains(1));
}

#[test]
fn test_get_or_create_never_duplicates() {
    let (registry, _) = registry();
    let (a, created_a) = registry.get_or_create(4, H256::NIL);
    let (b, created_b) = registry.get_or_create(4, H256::keccak256(b"ignored"));
    assert!(created_a);
    assert!(!created_b);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(*b.previous_output(), H256::NIL);
    assert_eq!(registry.latest_round(), 4);
}

#[test]
fn test_concurrent_creation_yields_one_round() {
    let (registry, _) = registry();
    let registry = Arc::new(registry);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.advance(1).unwrap())
        })
        .collect();
    let rounds: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(rounds.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_drop_below_keeps_finalized_head() {
    let (registry, _) = registry();
    for r in 1..=6 {
        registry.get_or_create(r, H256::NIL);
    }

    // Nothing finalized beyond genesis: the head is kept
    assert_eq!(registry.drop_below(3), 0);

    registry.set_finalized(4);
    assert_eq!(registry.drop_below(3), 3);
    assert_eq!(registry.oldest_round(), 3);
    assert!(!registry.contains(2));
    assert!(registry.contains(3));
}

#[test]
fn test_finalized_round_only_grows() {
    let (registry, _) = registry();
    registry.set_finalized(5);
    registry.set_finalized(3);
    assert_eq!(registry.finalized_round(), 5);
}
