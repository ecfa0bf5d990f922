//! Hybrid KEM + AEAD envelopes
//!
//! `hybrid_encrypt` establishes a one-shot AEAD key through a Kyber-768
//! encapsulation against the recipient's public key, seals the plaintext,
//! and frames the result as a self-contained envelope:
//!
//! ```text
//! [u32 BE encapsulated_len][encapsulated key][nonce 12B][AEAD ciphertext]
//! ```
//!
//! # Security
//!
//! - The KEM shared secret and the derived AEAD key are zeroized as soon as
//!   sealing/opening completes
//! - Decode validates the length prefix against the buffer before any
//!   allocation; truncated or inconsistent envelopes fail fast
//! - The derived associated data binds the ciphertext to the encapsulation,
//!   so splicing an encapsulated key from one envelope into another fails
//!   authentication

use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::primitives::{aead, kdf};

/// Domain label for deriving the envelope AEAD key and associated data
const HYBRID_LABEL: &[u8] = b"murmur/hybrid/v1";

/// Kyber-768 public key for hybrid encryption.
#[derive(Clone)]
pub struct KemPublicKey(kyber768::PublicKey);

/// Kyber-768 secret key for hybrid decryption.
#[derive(Clone)]
pub struct KemSecretKey(kyber768::SecretKey);

/// A Kyber-768 keypair.
#[derive(Clone)]
pub struct KemKeyPair {
    /// Public half, safe to publish in key packages
    pub public: KemPublicKey,
    /// Secret half, held by the local identity only
    pub secret: KemSecretKey,
}

impl KemKeyPair {
    /// Generate a fresh Kyber-768 keypair.
    pub fn generate() -> Self {
        let (public, secret) = kyber768::keypair();
        Self { public: KemPublicKey(public), secret: KemSecretKey(secret) }
    }
}

impl KemPublicKey {
    /// Raw public key bytes for publication.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parse a public key from published bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKeyMaterial` if the bytes are not a valid Kyber-768
    /// public key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        kyber768::PublicKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::MalformedKeyMaterial("kyber768 public key"))
    }
}

impl KemSecretKey {
    /// Raw secret key bytes for encrypted persistence only.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Restore a secret key from encrypted persistence.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKeyMaterial` if the bytes are not a valid Kyber-768
    /// secret key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        kyber768::SecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::MalformedKeyMaterial("kyber768 secret key"))
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemPublicKey").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for KemSecretKey {
    // Never prints key bytes
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemSecretKey").finish_non_exhaustive()
    }
}

/// Derive the AEAD key and associated data from a KEM shared secret.
fn derive_envelope_keys(shared_secret: &[u8]) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<Vec<u8>>), CryptoError> {
    let okm = kdf::expand(shared_secret, HYBRID_LABEL, 64)?;
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&okm[..32]);
    let aad = Zeroizing::new(okm[32..].to_vec());
    Ok((key, aad))
}

/// Hybrid-encrypt a plaintext to a recipient's Kyber-768 public key.
///
/// Returns the serialized envelope. The KEM shared secret and the derived
/// AEAD key are wiped before this function returns.
pub fn hybrid_encrypt(plaintext: &[u8], recipient: &KemPublicKey) -> Result<Vec<u8>, CryptoError> {
    let (shared_secret, encapsulated) = kyber768::encapsulate(&recipient.0);
    let shared = Zeroizing::new(shared_secret.as_bytes().to_vec());

    let (key, aad) = derive_envelope_keys(&shared)?;
    let nonce = aead::generate_nonce();
    let ciphertext = aead::seal(&key, &nonce, plaintext, &aad);

    let encapsulated_bytes = encapsulated.as_bytes();
    let mut envelope =
        Vec::with_capacity(4 + encapsulated_bytes.len() + aead::NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&(encapsulated_bytes.len() as u32).to_be_bytes());
    envelope.extend_from_slice(encapsulated_bytes);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Open a hybrid envelope with the recipient's secret key.
///
/// # Errors
///
/// - `EnvelopeTruncated` / `LengthPrefixMismatch` if the framing is
///   inconsistent with the buffer size
/// - `DecryptionFailed` if the AEAD tag does not verify
pub fn hybrid_decrypt(envelope: &[u8], secret: &KemSecretKey) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < 4 {
        return Err(CryptoError::EnvelopeTruncated { expected: 4, actual: envelope.len() });
    }

    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&envelope[..4]);
    let encapsulated_len = u32::from_be_bytes(prefix) as usize;

    let body = &envelope[4..];
    let header_len = encapsulated_len
        .checked_add(aead::NONCE_SIZE)
        .ok_or(CryptoError::LengthPrefixMismatch { claimed: encapsulated_len, available: body.len() })?;
    if body.len() < header_len {
        return Err(CryptoError::LengthPrefixMismatch {
            claimed: encapsulated_len,
            available: body.len(),
        });
    }

    let encapsulated = kyber768::Ciphertext::from_bytes(&body[..encapsulated_len])
        .map_err(|_| CryptoError::MalformedKeyMaterial("kyber768 encapsulated key"))?;

    let mut nonce = [0u8; aead::NONCE_SIZE];
    nonce.copy_from_slice(&body[encapsulated_len..header_len]);
    let ciphertext = &body[header_len..];

    let shared_secret = kyber768::decapsulate(&encapsulated, &secret.0);
    let shared = Zeroizing::new(shared_secret.as_bytes().to_vec());

    let (key, aad) = derive_envelope_keys(&shared)?;
    aead::open(&key, &nonce, ciphertext, &aad)
}
