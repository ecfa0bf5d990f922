//! Persistence capability for session and group state.
//!
//! The engine never touches a filesystem or database directly; the host
//! injects a [`Storage`] implementation and the engine stores opaque,
//! already-serialized byte values under string keys. [`MemoryStorage`] is
//! the in-process implementation used in tests and simulations.

mod memory;

pub use memory::MemoryStorage;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from the injected storage capability
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying storage system failure (file system, database, platform
    /// keychain)
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Async key-value persistence injected by the host.
///
/// Implementations typically share internal state via `Arc`, so clones
/// access the same underlying storage; values are opaque bytes the engine
/// has already encrypted or serialized.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, overwriting any existing value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove the value under `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
