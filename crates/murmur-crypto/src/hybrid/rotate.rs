//! Epoch key rotation for long-lived secrets
//!
//! A secret that survives across epochs must not let one epoch's key reveal
//! another's. `rotate_key` pulls a fresh random salt for every rotation and
//! folds the epoch number into the derivation label, so:
//!
//! - rotating the same secret twice yields unrelated keys (random salt)
//! - a leaked epoch key says nothing about earlier or later epochs
//! - the caller's in-place secret is wiped once the new key is derived

use rand::RngCore;
use zeroize::Zeroize;

use crate::primitives::kdf;

/// Label prefix for epoch rotation derivations
const ROTATE_LABEL: &[u8] = b"murmur/rotate/v1";

/// Derive a fresh 32-byte key for `epoch` from `secret`, wiping `secret`.
///
/// The old secret is zeroized in place before this function returns; the
/// caller keeps only the returned key.
///
/// # Security
///
/// A random 32-byte salt is drawn from the OS RNG for each call, so two
/// rotations of identical input never collide. The epoch number is bound
/// into the HKDF label so keys cannot be replayed across epochs even if a
/// salt were reused.
pub fn rotate_key(secret: &mut [u8], epoch: u64) -> [u8; 32] {
    let mut salt = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let mut label = Vec::with_capacity(ROTATE_LABEL.len() + 8);
    label.extend_from_slice(ROTATE_LABEL);
    label.extend_from_slice(&epoch.to_be_bytes());

    let key = kdf::extract_and_expand(&salt, secret, &label);
    secret.zeroize();
    key
}
