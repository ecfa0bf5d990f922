//! X25519 Diffie-Hellman agreement
//!
//! Wraps `x25519-dalek` static secrets so the rest of the workspace deals in
//! one keypair type with explicit byte conversions for persistence.

use rand::rngs::OsRng;
pub use x25519_dalek::PublicKey;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// X25519 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// An X25519 keypair.
///
/// The secret half zeroizes on drop (provided by `x25519-dalek`). Byte
/// export of the secret exists only for encrypted persistence of session
/// state; it must never cross the storage boundary unencrypted.
#[derive(Clone)]
pub struct DhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DhKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct a keypair from a stored secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half of the keypair.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Secret bytes for encrypted persistence.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Compute the X25519 shared secret with a remote public key.
    ///
    /// The result is wrapped in [`Zeroizing`] so it is wiped when the caller
    /// drops it after key derivation.
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.diffie_hellman(their_public).to_bytes())
    }
}

impl std::fmt::Debug for DhKeyPair {
    // Never prints the secret half
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair").field("public", &self.public.as_bytes()).finish_non_exhaustive()
    }
}

/// Parse a public key from raw bytes.
///
/// # Errors
///
/// Returns `InvalidKeyLength` if the slice is not exactly 32 bytes.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidKeyLength { expected: PUBLIC_KEY_SIZE, actual: bytes.len() }
    })?;
    Ok(PublicKey::from(array))
}
