//! SHA-256 hashing

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash output size in bytes
pub const HASH_SIZE: usize = 32;

/// SHA-256 of a single buffer.
pub fn sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the concatenation of two buffers.
///
/// Used for pairwise Merkle reduction so intermediate nodes never need a
/// concatenated allocation.
pub fn sha256_pair(left: &[u8], right: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Constant-time equality for digests and fingerprints.
///
/// Use this wherever a hash is compared outside an AEAD tag check, so lookup
/// timing does not leak which entry matched.
pub fn digest_eq(a: &[u8; HASH_SIZE], b: &[u8; HASH_SIZE]) -> bool {
    a.ct_eq(b).into()
}
