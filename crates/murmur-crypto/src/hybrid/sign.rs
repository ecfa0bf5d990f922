//! Dilithium-3 signature packets with replay protection
//!
//! Raw post-quantum signatures say nothing about *when* they were made. The
//! packet format here appends an 8-byte big-endian unix timestamp and a
//! 32-byte random nonce to the signed buffer, so every signature is bound to
//! a specific moment:
//!
//! ```text
//! [signature][timestamp 8B BE][nonce 32B]
//! ```
//!
//! Verification reconstructs `data || timestamp || nonce` and rejects
//! packets whose timestamp falls outside a ±5-minute freshness window.

use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use rand::RngCore;

use crate::error::CryptoError;

/// Timestamp (8 bytes) plus nonce (32 bytes) appended to every signature
pub const SIGNATURE_PACKET_OVERHEAD: usize = 40;

/// Freshness window for signature packets, in seconds (5 minutes)
const FRESHNESS_WINDOW_SECS: u64 = 300;

/// Dilithium-3 signing keypair.
#[derive(Clone)]
pub struct SigningKeyPair {
    public: dilithium3::PublicKey,
    secret: dilithium3::SecretKey,
}

impl SigningKeyPair {
    /// Generate a fresh Dilithium-3 keypair.
    pub fn generate() -> Self {
        let (public, secret) = dilithium3::keypair();
        Self { public, secret }
    }

    /// Raw public key bytes for publication.
    pub fn public_bytes(&self) -> &[u8] {
        self.public.as_bytes()
    }

    /// Raw secret key bytes for encrypted persistence only.
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    /// Restore a keypair from persisted halves.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKeyMaterial` if either half fails to parse.
    pub fn from_bytes(public: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            public: dilithium3::PublicKey::from_bytes(public)
                .map_err(|_| CryptoError::MalformedKeyMaterial("dilithium3 public key"))?,
            secret: dilithium3::SecretKey::from_bytes(secret)
                .map_err(|_| CryptoError::MalformedKeyMaterial("dilithium3 secret key"))?,
        })
    }
}

impl std::fmt::Debug for SigningKeyPair {
    // Never prints the secret half
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair").finish_non_exhaustive()
    }
}

/// Sign `data` into a replay-protected packet using the current time.
pub fn quantum_safe_sign(data: &[u8], keypair: &SigningKeyPair) -> Vec<u8> {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    sign_at(data, keypair, now_secs(), nonce)
}

/// Verify a signature packet against `data` using the current time.
///
/// # Errors
///
/// - `EnvelopeTruncated` if the packet is shorter than a signature plus the
///   40-byte timestamp/nonce trailer
/// - `SignatureExpired` if the timestamp is outside the freshness window
/// - `SignatureInvalid` if the Dilithium verification fails
pub fn quantum_safe_verify(
    data: &[u8],
    packet: &[u8],
    public_key: &[u8],
) -> Result<(), CryptoError> {
    verify_at(data, packet, public_key, now_secs())
}

/// Sign with an explicit timestamp and nonce (deterministic for testing).
pub(crate) fn sign_at(
    data: &[u8],
    keypair: &SigningKeyPair,
    timestamp_secs: u64,
    nonce: [u8; 32],
) -> Vec<u8> {
    let signed_buffer = bind(data, timestamp_secs, &nonce);
    let signature = dilithium3::detached_sign(&signed_buffer, &keypair.secret);

    let signature_bytes = signature.as_bytes();
    let mut packet = Vec::with_capacity(signature_bytes.len() + SIGNATURE_PACKET_OVERHEAD);
    packet.extend_from_slice(signature_bytes);
    packet.extend_from_slice(&timestamp_secs.to_be_bytes());
    packet.extend_from_slice(&nonce);
    packet
}

/// Verify with an explicit "now" (deterministic for testing).
pub(crate) fn verify_at(
    data: &[u8],
    packet: &[u8],
    public_key: &[u8],
    now_secs: u64,
) -> Result<(), CryptoError> {
    let minimum = dilithium3::signature_bytes() + SIGNATURE_PACKET_OVERHEAD;
    if packet.len() < minimum {
        return Err(CryptoError::EnvelopeTruncated { expected: minimum, actual: packet.len() });
    }

    let trailer_start = packet.len() - SIGNATURE_PACKET_OVERHEAD;
    let (signature_bytes, trailer) = packet.split_at(trailer_start);

    let mut timestamp_bytes = [0u8; 8];
    timestamp_bytes.copy_from_slice(&trailer[..8]);
    let timestamp_secs = u64::from_be_bytes(timestamp_bytes);

    let skew = now_secs.abs_diff(timestamp_secs);
    if skew > FRESHNESS_WINDOW_SECS {
        return Err(CryptoError::SignatureExpired {
            skew_secs: skew,
            limit_secs: FRESHNESS_WINDOW_SECS,
        });
    }

    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&trailer[8..]);

    let public = dilithium3::PublicKey::from_bytes(public_key)
        .map_err(|_| CryptoError::MalformedKeyMaterial("dilithium3 public key"))?;
    let signature = dilithium3::DetachedSignature::from_bytes(signature_bytes)
        .map_err(|_| CryptoError::MalformedKeyMaterial("dilithium3 signature"))?;

    let signed_buffer = bind(data, timestamp_secs, &nonce);
    dilithium3::verify_detached_signature(&signature, &signed_buffer, &public)
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Build `data || timestamp || nonce`, the actual signed buffer.
fn bind(data: &[u8], timestamp_secs: u64, nonce: &[u8; 32]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(data.len() + SIGNATURE_PACKET_OVERHEAD);
    buffer.extend_from_slice(data);
    buffer.extend_from_slice(&timestamp_secs.to_be_bytes());
    buffer.extend_from_slice(nonce);
    buffer
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
