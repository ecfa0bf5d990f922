//! Property-based tests for the hybrid envelope
//!
//! Verifies round-trip and rejection properties for arbitrary payloads and
//! arbitrary corruption, not just hand-picked examples.

use murmur_crypto::hybrid::{KemKeyPair, hybrid_decrypt, hybrid_encrypt};
use proptest::prelude::*;

#[test]
fn prop_envelope_roundtrip_any_payload() {
    let recipient = KemKeyPair::generate();

    proptest!(ProptestConfig::with_cases(16), |(payload in prop::collection::vec(any::<u8>(), 0..2048))| {
        let envelope = hybrid_encrypt(&payload, &recipient.public).expect("should encrypt");
        let opened = hybrid_decrypt(&envelope, &recipient.secret).expect("should decrypt");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(opened, payload);
    });
}

#[test]
fn prop_any_flipped_bit_is_rejected() {
    let recipient = KemKeyPair::generate();
    let envelope = hybrid_encrypt(b"tamper target", &recipient.public).expect("should encrypt");

    proptest!(ProptestConfig::with_cases(64), |(index in 0..envelope.len(), bit in 0u8..8)| {
        let mut tampered = envelope.clone();
        tampered[index] ^= 1 << bit;

        // PROPERTY: Corruption anywhere fails, including inside the Kyber
        // encapsulation where implicit rejection surfaces as an AEAD failure
        let result = hybrid_decrypt(&tampered, &recipient.secret);
        prop_assert!(result.is_err(), "flipped bit {} of byte {} must be rejected", bit, index);
    });
}

#[test]
fn prop_envelope_unreadable_under_other_keys() {
    let recipient = KemKeyPair::generate();
    let other = KemKeyPair::generate();

    proptest!(ProptestConfig::with_cases(8), |(payload in prop::collection::vec(any::<u8>(), 1..256))| {
        let envelope = hybrid_encrypt(&payload, &recipient.public).expect("should encrypt");

        // PROPERTY: Only the addressed secret key opens the envelope
        let result = hybrid_decrypt(&envelope, &other.secret);
        prop_assert!(result.is_err(), "foreign secret key must not decrypt");
    });
}
