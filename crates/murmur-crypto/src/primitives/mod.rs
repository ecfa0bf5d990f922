//! Primitive layer: pure functions over byte buffers
//!
//! No protocol state lives here. Every function is deterministic given its
//! inputs, except the explicit nonce/keypair generators which draw from the
//! operating system RNG.
//!
//! # Security
//!
//! Functions that accept secret key material never retain it; callers remain
//! responsible for wiping their own copies with [`wipe`] (or by holding them
//! in [`zeroize::Zeroizing`]) once an operation completes.

pub mod aead;
pub mod dh;
pub mod hash;
pub mod kdf;
pub mod sign;

use zeroize::Zeroize;

/// Securely zero a secret buffer in place.
///
/// Thin wrapper over [`zeroize`] so callers of the primitive layer have an
/// explicit wipe operation without importing the crate themselves.
pub fn wipe(secret: &mut [u8]) {
    secret.zeroize();
}
