//! Tests for Block and TxnRef types

use roundchain_crypto::{BlsPrivateKey, DomainTag};
use roundchain_types::{Block, TxnRef, H256, GENESIS_PROPOSER};

fn proposal_domain() -> DomainTag {
    DomainTag::new_proposal("devnet")
}

fn build(round: u64, prev: H256, txns: Vec<TxnRef>, key: &BlsPrivateKey) -> Block {
    Block::new_signed(
        round,
        prev,
        1,
        H256::keccak256(&round.to_le_bytes()),
        txns,
        H256::keccak256(b"state"),
        key,
        &proposal_domain(),
    )
}

#[test]
fn test_block_hash_is_deterministic() {
    let key = BlsPrivateKey::from_seed(&[1u8; 32]).unwrap();
    let a = build(1, H256::NIL, vec![TxnRef::from_payload(b"t1")], &key);
    let b = build(1, H256::NIL, vec![TxnRef::from_payload(b"t1")], &key);
    assert_eq!(a.hash, b.hash);
    assert_eq!(a, b);
}

#[test]
fn test_every_field_feeds_the_hash() {
    let key = BlsPrivateKey::from_seed(&[1u8; 32]).unwrap();
    let base = build(2, H256::keccak256(b"p"), vec![], &key);

    let mut changed = base.clone();
    changed.round = 3;
    assert_ne!(changed.compute_hash(), base.hash);

    let mut changed = base.clone();
    changed.prev_hash = H256::keccak256(b"q");
    assert_ne!(changed.compute_hash(), base.hash);

    let mut changed = base.clone();
    changed.proposer_id = 9;
    assert_ne!(changed.compute_hash(), base.hash);

    let mut changed = base.clone();
    changed.random_seed = H256::NIL;
    assert_ne!(changed.compute_hash(), base.hash);

    let mut changed = base.clone();
    changed.state_root = H256::NIL;
    assert_ne!(changed.compute_hash(), base.hash);

    let mut changed = base.clone();
    changed.transactions.push(TxnRef::from_payload(b"x"));
    assert_ne!(changed.compute_hash(), base.hash);
    assert!(changed.validate_hash().is_err());
}

#[test]
fn test_signature_verification() {
    let key = BlsPrivateKey::from_seed(&[2u8; 32]).unwrap();
    let other = BlsPrivateKey::from_seed(&[3u8; 32]).unwrap();
    let block = build(1, H256::NIL, vec![], &key);

    assert!(block.verify_signature(&key.public_key(), &proposal_domain()));
    assert!(!block.verify_signature(&other.public_key(), &proposal_domain()));
    assert!(!block.verify_signature(&key.public_key(), &DomainTag::new_ticket("devnet")));
}

#[test]
fn test_tampered_block_fails_signature() {
    let key = BlsPrivateKey::from_seed(&[2u8; 32]).unwrap();
    let mut block = build(1, H256::NIL, vec![], &key);
    block.transactions.push(TxnRef::from_payload(b"smuggled"));
    block.hash = block.compute_hash();
    assert!(!block.verify_signature(&key.public_key(), &proposal_domain()));
}

#[test]
fn test_genesis_block() {
    let seed = H256::keccak256(b"ROUNDCHAIN_GENESIS_BEACONdevnet");
    let genesis = Block::genesis(seed, H256::NIL);
    assert_eq!(genesis.round, 0);
    assert_eq!(genesis.proposer_id, GENESIS_PROPOSER);
    assert!(genesis.prev_hash.is_nil());
    assert!(genesis.validate_hash().is_ok());
    assert_eq!(Block::genesis(seed, H256::NIL).hash, genesis.hash);
}

#[test]
fn test_contains_transaction() {
    let key = BlsPrivateKey::from_seed(&[4u8; 32]).unwrap();
    let t1 = TxnRef::from_payload(b"t1");
    let t2 = TxnRef::from_payload(b"t2");
    let block = build(1, H256::NIL, vec![t1], &key);
    assert!(block.contains(&t1));
    assert!(!block.contains(&t2));
}

#[test]
fn test_block_serde_json() {
    let key = BlsPrivateKey::from_seed(&[5u8; 32]).unwrap();
    let block = build(4, H256::keccak256(b"p"), vec![TxnRef::from_payload(b"t")], &key);
    let json = serde_json::to_string(&block).unwrap();
    let decoded: Block = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, block);
    assert!(decoded.verify_signature(&key.public_key(), &proposal_domain()));
}

#[test]
fn test_txn_ref_serializes_as_hash() {
    let txn = TxnRef::from_payload(b"payload");
    let json = serde_json::to_string(&txn).unwrap();
    assert_eq!(json, format!("\"{}\"", txn.0.to_hex()));
}
