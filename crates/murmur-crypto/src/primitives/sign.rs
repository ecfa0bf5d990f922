//! Ed25519 signatures
//!
//! Classical signatures for prekey attestation: a device signs its published
//! signed-prekey with its long-lived identity signing key, and peers verify
//! the attestation before trusting the prekey for X3DH.

use ed25519_dalek::{Signature, Signer, Verifier};
pub use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Generate a fresh Ed25519 signing key from the OS RNG.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Sign a message, returning the raw 64-byte signature.
pub fn sign(key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    key.sign(message).to_bytes()
}

/// Verify a raw signature over a message.
///
/// # Errors
///
/// Returns `SignatureInvalid` on any mismatch; `InvalidKeyLength` if the
/// signature slice has the wrong size.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let bytes: [u8; SIGNATURE_SIZE] = signature.try_into().map_err(|_| {
        CryptoError::InvalidKeyLength { expected: SIGNATURE_SIZE, actual: signature.len() }
    })?;
    let signature = Signature::from_bytes(&bytes);
    key.verify(message, &signature).map_err(|_| CryptoError::SignatureInvalid)
}

/// Parse a verifying key from raw bytes.
///
/// # Errors
///
/// Returns `MalformedKeyMaterial` if the bytes are not a valid curve point.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, actual: bytes.len() })?;
    VerifyingKey::from_bytes(&array)
        .map_err(|_| CryptoError::MalformedKeyMaterial("ed25519 verifying key"))
}
