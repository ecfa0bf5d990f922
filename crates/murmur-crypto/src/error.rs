//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from primitive and hybrid-layer operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material has the wrong length for the requested operation
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// AEAD open failed (authentication tag mismatch or corrupt ciphertext)
    ///
    /// No partial plaintext is ever returned; the failure is indistinguishable
    /// between a wrong key, a wrong nonce, and a tampered ciphertext.
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Signature did not verify against the given public key and message
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Signature packet timestamp is outside the freshness window
    #[error("signature outside freshness window: {skew_secs}s skew, limit {limit_secs}s")]
    SignatureExpired {
        /// Absolute skew between the packet timestamp and local time
        skew_secs: u64,
        /// Maximum tolerated skew
        limit_secs: u64,
    },

    /// Envelope or packet is shorter than its framing requires
    #[error("envelope truncated: need {expected} bytes, have {actual}")]
    EnvelopeTruncated {
        /// Minimum byte count the framing requires
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// A length prefix claims more bytes than the buffer holds
    #[error("length prefix inconsistent: claims {claimed} bytes, {available} available")]
    LengthPrefixMismatch {
        /// Length the prefix claims
        claimed: usize,
        /// Bytes actually available after the prefix
        available: usize,
    },

    /// Encapsulated key, public key, or signature bytes failed to parse
    #[error("malformed key material: {0}")]
    MalformedKeyMaterial(&'static str),

    /// Requested KDF output length exceeds what HKDF-SHA256 can produce
    #[error("kdf output too long: {requested} bytes requested")]
    KdfOutputTooLong {
        /// Requested output length
        requested: usize,
    },
}

impl CryptoError {
    /// Returns true if this error is a verification failure (as opposed to a
    /// structural/parsing problem with the input).
    ///
    /// Verification failures must never be retried: re-running a failed AEAD
    /// open or signature check with the same inputs cannot succeed.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed | Self::SignatureInvalid | Self::SignatureExpired { .. }
        )
    }
}
