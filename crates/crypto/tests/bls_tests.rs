//! Tests for BLS12-381 node keys

use roundchain_crypto::bls::{BlsPrivateKey, BlsPublicKey, BlsSignature, DomainTag, MessageType};

#[test]
fn test_key_generation() {
    let sk1 = BlsPrivateKey::random();
    let sk2 = BlsPrivateKey::random();
    assert_ne!(sk1.to_bytes(), sk2.to_bytes());
}

#[test]
fn test_key_from_seed() {
    let seed = [42u8; 32];
    let sk1 = BlsPrivateKey::from_seed(&seed).unwrap();
    let sk2 = BlsPrivateKey::from_seed(&seed).unwrap();
    assert_eq!(sk1.to_bytes(), sk2.to_bytes());
}

#[test]
fn test_hex_roundtrip() {
    let sk = BlsPrivateKey::random();
    let restored = BlsPrivateKey::from_hex(&hex::encode(sk.to_bytes())).unwrap();
    assert_eq!(sk.public_key(), restored.public_key());

    let sig = sk.sign_with_domain(b"test", &DomainTag::new_ticket("devnet"));
    let from_hex = BlsSignature::from_hex(&sig.to_hex()).unwrap();
    assert_eq!(sig, from_hex);
}

#[test]
fn test_public_key_verify() {
    let sk = BlsPrivateKey::random();
    let pk = sk.public_key();
    let domain = DomainTag::new_proposal("devnet");

    let sig = sk.sign_with_domain(b"block", &domain);
    assert!(pk.verify_with_domain(b"block", &sig, &domain));
}

#[test]
fn test_custom_domain() {
    let domain = DomainTag::new(MessageType::Custom, "devnet");
    assert_eq!(domain.message_type(), MessageType::Custom);
    assert_eq!(domain.chain_id(), "devnet");
    assert!(domain.dst().starts_with(b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_ROUNDCHAIN_"));
}

#[test]
fn test_pubkey_serde_json() {
    let pk = BlsPrivateKey::random().public_key();
    let json = serde_json::to_string(&pk).unwrap();
    let restored: BlsPublicKey = serde_json::from_str(&json).unwrap();
    assert_eq!(pk, restored);
}

#[test]
fn test_deterministic_signing() {
    let sk = BlsPrivateKey::random();
    let domain = DomainTag::new_beacon("devnet");
    let sig1 = sk.sign_with_domain(b"deterministic", &domain);
    let sig2 = sk.sign_with_domain(b"deterministic", &domain);
    assert_eq!(sig1, sig2);
}

#[test]
fn test_cross_key_verification_fails() {
    let sk1 = BlsPrivateKey::random();
    let pk2 = BlsPrivateKey::random().public_key();
    let domain = DomainTag::new_ticket("devnet");

    let sig = sk1.sign_with_domain(b"test", &domain);
    assert!(!sig.verify_with_domain(b"test", &pk2, &domain));
}

#[test]
fn test_public_key_ordering_is_by_bytes() {
    let mut keys: Vec<_> = (0..4).map(|_| BlsPrivateKey::random().public_key()).collect();
    keys.sort();
    for pair in keys.windows(2) {
        assert!(pair[0].to_bytes() <= pair[1].to_bytes());
    }
}
