//! Key derivation: HKDF-SHA256 expansion and HMAC chain ratcheting
//!
//! Two derivation families live here:
//!
//! - HKDF expansion with a domain-separation label, used for root keys,
//!   group keys, and hybrid envelope keys.
//! - HMAC-SHA256 one-way chain advancement, used by the symmetric ratchet
//!   to derive per-message keys.
//!
//! # Security Properties
//!
//! - Domain separation: every derivation context uses a distinct label
//! - One-way: a chain key cannot be recovered from its successor or from
//!   any message key derived from it
//! - Determinism: same inputs always produce the same outputs

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"murmur/chain";

/// Label for deriving a message key from a chain key
const MESSAGE_LABEL: &[u8] = b"murmur/message";

/// Label for root-key advancement during a DH ratchet step
const RATCHET_LABEL: &[u8] = b"murmur/ratchet";

/// Expand input key material into `out_len` bytes under a domain label.
///
/// Uses HKDF-SHA256 with no salt; the label is the `info` parameter.
///
/// # Errors
///
/// Returns `KdfOutputTooLong` if `out_len` exceeds 255 * 32 bytes.
pub fn expand(ikm: &[u8], label: &[u8], out_len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut out = Zeroizing::new(vec![0u8; out_len]);
    hkdf.expand(label, &mut out)
        .map_err(|_| CryptoError::KdfOutputTooLong { requested: out_len })?;
    Ok(out)
}

/// Expand input key material into exactly 32 bytes under a domain label.
pub fn expand_key(ikm: &[u8], label: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; 32];
    let Ok(()) = hkdf.expand(label, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

/// HKDF extract-then-expand with an explicit salt.
///
/// Used by epoch key rotation where a fresh random salt decouples the new
/// secret from the old one.
pub fn extract_and_expand(salt: &[u8], ikm: &[u8], label: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; 32];
    let Ok(()) = hkdf.expand(label, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

/// Advance the root key with a DH ratchet output.
///
/// Returns `(new_root_key, new_chain_key)`. The old root key is the HKDF
/// salt and the DH output is the input key material, so both parties of a
/// ratchet step derive identical results from identical DH agreements.
pub fn derive_root(root_key: &[u8; 32], dh_output: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output);
    let mut okm = Zeroizing::new([0u8; 64]);
    let Ok(()) = hkdf.expand(RATCHET_LABEL, okm.as_mut()) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut new_root = [0u8; 32];
    let mut new_chain = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    new_chain.copy_from_slice(&okm[32..]);
    (new_root, new_chain)
}

/// Derive the message key for the current chain position.
///
/// Does not advance the chain; pair with [`next_chain_key`].
pub fn message_key(chain_key: &[u8; 32]) -> [u8; 32] {
    hmac_derive(chain_key, MESSAGE_LABEL)
}

/// Derive the successor chain key.
///
/// The caller must zeroize and discard the old chain key after this call to
/// preserve forward secrecy.
pub fn next_chain_key(chain_key: &[u8; 32]) -> [u8; 32] {
    hmac_derive(chain_key, CHAIN_LABEL)
}

fn hmac_derive(key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}
