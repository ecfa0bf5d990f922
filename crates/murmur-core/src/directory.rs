//! External capabilities: key directory and message transport.
//!
//! The engine performs no network I/O of its own. The host injects a
//! [`Directory`] for fetching peers' published key material and a
//! [`Transport`] for pushing encrypted envelopes out. Incoming traffic flows
//! the other way: the host feeds received bytes into the orchestrator's
//! receive operations directly.

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::{KeyPackage, PreKeyBundle};

/// Errors from the injected directory or transport capabilities
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The requested user has no published record
    #[error("no directory record for {user_id}")]
    UserNotFound {
        /// The user that was looked up
        user_id: String,
    },

    /// The directory or transport backend failed
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Lookup service for peers' published key material.
///
/// Backed by the messaging service's key server; every method is a remote
/// fetch and may fail transiently.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch a one-shot prekey bundle for session establishment.
    ///
    /// The server consumes the included one-time prekey; calling twice
    /// returns two different bundles.
    async fn fetch_prekey_bundle(&self, user_id: &str) -> Result<PreKeyBundle, DirectoryError>;

    /// Fetch the user's current key package for group membership.
    async fn fetch_key_package(&self, user_id: &str) -> Result<KeyPackage, DirectoryError>;

    /// Fetch the user's opaque credential blob.
    async fn fetch_credential(&self, user_id: &str) -> Result<Vec<u8>, DirectoryError>;
}

/// Outbound delivery of encrypted envelopes.
///
/// The engine hands the transport fully encrypted bytes; the transport owns
/// routing, retries, and queuing for offline peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver an encrypted envelope to a peer or group.
    async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<(), DirectoryError>;
}
