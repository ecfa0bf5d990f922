//! Quantum hybrid layer
//!
//! Defense-in-depth against a future quantum adversary, layered on top of
//! the classical primitives:
//!
//! - [`encrypt`]: Kyber-768 KEM + ChaCha20-Poly1305 hybrid envelopes. The
//!   AEAD key is established through the KEM, so recorded traffic stays
//!   confidential even if X25519 is broken later.
//! - [`sign`]: Dilithium-3 signature packets with timestamp/nonce framing
//!   that binds every signature to a moment in time, frustrating replay.
//! - [`rotate`]: salted epoch rotation for long-lived secrets.
//!
//! This layer knows nothing about sessions or groups; it wraps byte buffers
//! for whoever asks.

pub mod encrypt;
pub mod rotate;
pub mod sign;

pub use encrypt::{KemKeyPair, KemPublicKey, KemSecretKey, hybrid_decrypt, hybrid_encrypt};
pub use rotate::rotate_key;
pub use sign::{
    SIGNATURE_PACKET_OVERHEAD, SigningKeyPair, quantum_safe_sign, quantum_safe_verify,
};
