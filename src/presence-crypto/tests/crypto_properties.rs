//! Property-based tests for credential signatures.
//!
//! A payload here stands in for `authenticatorData || SHA-256(clientDataJSON)`,
//! the bytes a platform authenticator signs during a ceremony.

use presence_crypto::{
    constant_time_eq, verify_signature, CoseAlgorithm, CredentialSigner, CredentialVerifier,
    Ed25519Signer, Ed25519Verifier, P256Signer, P256Verifier,
};
use proptest::prelude::*;

/// Strategy for assertion payloads: 37 bytes of authenticator data plus a
/// 32-byte client data hash, optionally followed by extension bytes.
fn assertion_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 69..=256)
}

fn signer_for(algorithm: CoseAlgorithm) -> Box<dyn CredentialSigner> {
    match algorithm {
        CoseAlgorithm::Es256 => Box::new(P256Signer::random()),
        CoseAlgorithm::EdDsa => Box::new(Ed25519Signer::random()),
    }
}

fn algorithm() -> impl Strategy<Value = CoseAlgorithm> {
    prop_oneof![Just(CoseAlgorithm::Es256), Just(CoseAlgorithm::EdDsa)]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// A signature made by the registered key always verifies.
    #[test]
    fn registered_key_roundtrip(alg in algorithm(), payload in assertion_payload()) {
        let signer = signer_for(alg);
        let signature = signer.sign(&payload).unwrap();
        let public_key = signer.public_key().unwrap();

        prop_assert!(verify_signature(alg, &public_key, &payload, &signature).unwrap());
    }

    /// Flipping any payload byte (e.g. the counter) breaks the signature.
    #[test]
    fn tampered_payload_fails(
        alg in algorithm(),
        payload in assertion_payload(),
        idx in any::<prop::sample::Index>()
    ) {
        let signer = signer_for(alg);
        let signature = signer.sign(&payload).unwrap();
        let public_key = signer.public_key().unwrap();

        let mut tampered = payload.clone();
        let i = idx.index(tampered.len());
        tampered[i] ^= 0x01;

        prop_assert!(!verify_signature(alg, &public_key, &tampered, &signature).unwrap());
    }

    /// A credential registered on another device does not verify.
    #[test]
    fn foreign_key_fails(alg in algorithm(), payload in assertion_payload()) {
        let signer = signer_for(alg);
        let other = signer_for(alg);
        let signature = signer.sign(&payload).unwrap();

        let result = verify_signature(alg, &other.public_key().unwrap(), &payload, &signature);
        prop_assert!(!result.unwrap());
    }

    /// ES256 signatures come out DER-encoded, as authenticators emit them.
    #[test]
    fn es256_signature_is_der(payload in assertion_payload()) {
        let signer = P256Signer::random();
        let signature = signer.sign(&payload).unwrap();

        prop_assert_eq!(signature[0], 0x30);
        prop_assert!((8..=72).contains(&signature.len()));
        prop_assert!(P256Verifier::new()
            .verify(&signer.public_key().unwrap(), &payload, &signature)
            .unwrap());
    }

    /// Corrupting an Ed25519 signature never yields a pass.
    #[test]
    fn ed25519_tampered_signature_fails(
        payload in assertion_payload(),
        tamper_idx in 0usize..64
    ) {
        let signer = Ed25519Signer::random();
        let mut signature = signer.sign(&payload).unwrap();
        signature[tamper_idx] ^= 0xFF;

        let result = Ed25519Verifier::new().verify(&signer.public_key().unwrap(), &payload, &signature);
        if let Ok(valid) = result {
            prop_assert!(!valid);
        }
    }

    /// Fingerprint hash comparison is reflexive.
    #[test]
    fn constant_time_reflexive(data in prop::collection::vec(any::<u8>(), 0..128)) {
        prop_assert!(constant_time_eq(&data, &data));
    }

    /// Fingerprint hash comparison is symmetric.
    #[test]
    fn constant_time_symmetric(
        a in prop::collection::vec(any::<u8>(), 0..64),
        b in prop::collection::vec(any::<u8>(), 0..64)
    ) {
        prop_assert_eq!(constant_time_eq(&a, &b), constant_time_eq(&b, &a));
    }

    /// A single differing character in a fingerprint hash is detected.
    #[test]
    fn constant_time_detects_difference(
        data in prop::collection::vec(any::<u8>(), 1..128),
        idx in any::<prop::sample::Index>()
    ) {
        let mut modified = data.clone();
        let i = idx.index(modified.len());
        modified[i] ^= 0x01;

        prop_assert!(!constant_time_eq(&data, &modified));
    }
}

#[test]
fn test_es256_public_key_is_uncompressed_point() {
    let public_key = P256Signer::random().public_key().unwrap();

    // 0x04 || X (32 bytes) || Y (32 bytes)
    assert_eq!(public_key.len(), 65);
    assert_eq!(public_key[0], 0x04);
}

#[test]
fn test_ed25519_from_seed_deterministic() {
    let seed = [7u8; 32];
    let signer1 = Ed25519Signer::from_seed(&seed).unwrap();
    let signer2 = Ed25519Signer::from_seed(&seed).unwrap();

    let data = b"enrollment payload";
    assert_eq!(signer1.sign(data).unwrap(), signer2.sign(data).unwrap());
}

#[test]
fn test_algorithm_mismatch_is_rejected() {
    let signer = Ed25519Signer::random();
    let data = b"payload";
    let signature = signer.sign(data).unwrap();

    // Claiming ES256 for an Ed25519 key must not pass.
    let result = verify_signature(
        CoseAlgorithm::Es256,
        &signer.public_key().unwrap(),
        data,
        &signature,
    );
    assert!(!matches!(result, Ok(true)));
}
