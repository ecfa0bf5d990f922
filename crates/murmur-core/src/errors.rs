//! Error types for the protocol engines

use murmur_crypto::CryptoError;
use murmur_proto::WireError;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

/// Errors from ratchet, group, and orchestrator operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// No session exists for the requested peer
    #[error("session not found for peer {peer_id}")]
    SessionNotFound {
        /// Peer whose session was requested
        peer_id: String,
    },

    /// No group exists with the requested id
    #[error("group not found: {group_id}")]
    GroupNotFound {
        /// Group that was requested
        group_id: String,
    },

    /// AEAD open failed; fails closed, no partial plaintext is returned
    ///
    /// Never retried: re-running a failed open with the same inputs cannot
    /// succeed.
    #[error("decryption failure")]
    DecryptionFailure,

    /// Message was encrypted under a different group epoch
    ///
    /// This is the forward-secrecy fence for membership changes: messages
    /// are only valid within the epoch they were encrypted under.
    #[error("epoch mismatch: group at {expected}, message at {actual}")]
    EpochMismatch {
        /// The group's current epoch
        expected: u64,
        /// Epoch claimed by the message
        actual: u64,
    },

    /// Proposal is malformed or its proposer is not authorized
    #[error("invalid proposal: {reason}")]
    ProposalInvalid {
        /// Why the proposal was rejected
        reason: String,
    },

    /// One-time prekey pool is exhausted
    ///
    /// The caller must replenish the pool before requesting further bundles.
    #[error("one-time prekey pool exhausted")]
    KeyExhausted,

    /// Duplicate envelope id, or a signature packet outside its window
    #[error("replay detected for message {message_id}")]
    ReplayDetected {
        /// The duplicated message id
        message_id: Uuid,
    },

    /// Session establishment failed before any state was persisted
    ///
    /// Raised when a prekey referenced by an incoming bootstrap message no
    /// longer exists (already consumed, or rotated out past supersession).
    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        /// Why establishment was aborted
        reason: String,
    },

    /// A cryptographic primitive failed structurally
    #[error(transparent)]
    Crypto(CryptoError),

    /// Wire encoding or decoding failed
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The storage capability failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The directory or transport capability failed
    #[error(transparent)]
    Directory(#[from] crate::directory::DirectoryError),
}

impl From<CryptoError> for EngineError {
    /// AEAD verification failures map onto the engine's fail-closed
    /// `DecryptionFailure`; structural crypto errors pass through.
    fn from(err: CryptoError) -> Self {
        if matches!(err, CryptoError::DecryptionFailed) {
            Self::DecryptionFailure
        } else {
            Self::Crypto(err)
        }
    }
}

impl EngineError {
    /// Returns true if this error is fatal (unrecoverable for this input)
    ///
    /// Fatal errors must not be retried; transient errors may be recoverable
    /// after state sync, replenishment, or backoff.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DecryptionFailure
            | Self::ProposalInvalid { .. }
            | Self::ReplayDetected { .. }
            | Self::HandshakeFailed { .. } => true,
            Self::Crypto(err) => err.is_verification_failure(),
            Self::Wire(_) => true,

            // Recoverable after establishment, sync, or replenishment
            Self::SessionNotFound { .. }
            | Self::GroupNotFound { .. }
            | Self::EpochMismatch { .. }
            | Self::KeyExhausted
            | Self::Storage(_)
            | Self::Directory(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failure_is_fatal() {
        assert!(EngineError::DecryptionFailure.is_fatal());
    }

    #[test]
    fn session_not_found_is_not_fatal() {
        assert!(!EngineError::SessionNotFound { peer_id: "bob".into() }.is_fatal());
    }

    #[test]
    fn epoch_mismatch_is_not_fatal() {
        assert!(!EngineError::EpochMismatch { expected: 2, actual: 0 }.is_fatal());
    }

    #[test]
    fn aead_failure_converts_to_decryption_failure() {
        let err = EngineError::from(CryptoError::DecryptionFailed);
        assert!(matches!(err, EngineError::DecryptionFailure));
    }

    #[test]
    fn structural_crypto_error_passes_through() {
        let err = EngineError::from(CryptoError::InvalidKeyLength { expected: 32, actual: 16 });
        assert!(matches!(err, EngineError::Crypto(_)));
    }

    #[test]
    fn error_display() {
        let err = EngineError::EpochMismatch { expected: 3, actual: 1 };
        assert_eq!(err.to_string(), "epoch mismatch: group at 3, message at 1");
    }
}
