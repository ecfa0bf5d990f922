//! Authenticated encryption using ChaCha20-Poly1305
//!
//! Seal/open are pure functions: the nonce is always caller-provided, which
//! keeps encryption deterministic for testing. [`generate_nonce`] draws a
//! fresh random nonce from the OS RNG for production paths.
//!
//! # Security
//!
//! - Open fails closed on any tag mismatch; the Poly1305 comparison inside
//!   the cipher crate is constant-time
//! - Associated data is authenticated but not encrypted
//! - A (key, nonce) pair must never be reused for different plaintexts;
//!   every caller in this workspace derives a fresh message key or draws a
//!   fresh random nonce per seal

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::error::CryptoError;

/// AEAD key size in bytes
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Draw a fresh random nonce from the OS RNG.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` under `key` with the given nonce and associated data.
///
/// Returns ciphertext with the 16-byte Poly1305 tag appended.
pub fn seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

/// Open `ciphertext` sealed by [`seal`].
///
/// # Errors
///
/// Returns `DecryptionFailed` if the tag does not verify: wrong key, wrong
/// nonce, mismatched associated data, and tampered ciphertext are all
/// indistinguishable by design.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}
