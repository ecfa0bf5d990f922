//! Property-based tests for envelope framing
//!
//! Verifies round-trip and rejection properties for arbitrary inputs, not
//! just hand-picked examples.

use murmur_proto::{GroupAad, GroupEnvelope, PreKeyHeader, RatchetMessage, WireError};
use proptest::prelude::*;

fn arbitrary_group_envelope() -> impl Strategy<Value = GroupEnvelope> {
    (
        any::<[u8; 12]>(),
        prop::collection::vec(any::<u8>(), 0..256),
        prop::collection::vec(any::<u8>(), 0..1024),
    )
        .prop_map(|(nonce, aad, ciphertext)| GroupEnvelope { nonce, aad, ciphertext })
}

fn arbitrary_ratchet_message() -> impl Strategy<Value = RatchetMessage> {
    (
        prop::option::of((
            any::<[u8; 32]>(),
            any::<u32>(),
            any::<u32>(),
            prop::option::of(any::<u32>()),
        )),
        any::<u32>(),
        any::<u32>(),
        any::<[u8; 12]>(),
        prop::collection::vec(any::<u8>(), 0..1024),
    )
        .prop_map(|(prekey, index, previous_counter, nonce, ciphertext)| RatchetMessage {
            prekey: prekey.map(
                |(identity_key, registration_id, signed_prekey_id, one_time_prekey_id)| {
                    PreKeyHeader {
                        identity_key,
                        registration_id,
                        signed_prekey_id,
                        one_time_prekey_id,
                    }
                },
            ),
            index,
            previous_counter,
            nonce,
            ciphertext,
        })
}

#[test]
fn prop_group_envelope_roundtrip() {
    proptest!(|(envelope in arbitrary_group_envelope())| {
        let wire = envelope.to_bytes();
        let decoded = GroupEnvelope::decode(&wire).expect("should decode");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded, envelope);
    });
}

#[test]
fn prop_group_envelope_size_is_exact() {
    proptest!(|(envelope in arbitrary_group_envelope())| {
        let wire = envelope.to_bytes();

        // PROPERTY: nonce + length prefix + aad + ciphertext, nothing else
        prop_assert_eq!(wire.len(), 12 + 4 + envelope.aad.len() + envelope.ciphertext.len());
    });
}

#[test]
fn prop_truncated_group_envelope_never_panics() {
    proptest!(|(envelope in arbitrary_group_envelope(), cut in 0usize..16)| {
        let wire = envelope.to_bytes();
        let truncated = &wire[..wire.len().min(cut)];

        // PROPERTY: Short buffers produce errors, never panics or garbage
        let result = GroupEnvelope::decode(truncated);
        prop_assert!(
            matches!(result, Err(WireError::Truncated { .. })),
            "short buffer must fail to decode, got {:?}",
            result
        );
    });
}

#[test]
fn prop_group_aad_roundtrip() {
    proptest!(|(epoch in any::<u64>(), sender in ".{0,32}", timestamp in any::<u64>())| {
        let aad = GroupAad { epoch, sender, timestamp };
        let bytes = aad.to_bytes().expect("should encode");
        let decoded = GroupAad::from_bytes(&bytes).expect("should decode");
        prop_assert_eq!(decoded, aad);
    });
}

#[test]
fn prop_ratchet_message_roundtrip() {
    proptest!(|(message in arbitrary_ratchet_message())| {
        let bytes = message.to_bytes().expect("should encode");
        let decoded = RatchetMessage::from_bytes(&bytes).expect("should decode");
        prop_assert_eq!(decoded, message);
    });
}
