//! Murmur Protocol Engine
//!
//! State machines and orchestration for the Murmur end-to-end encryption
//! core, layered over [`murmur_crypto`] and [`murmur_proto`]:
//!
//! - [`keys`]: identity, signed prekeys, and the one-time prekey pool
//! - [`ratchet`]: X3DH session establishment
//! - [`session`]: the per-peer double ratchet
//! - [`group`]: tree-committed group membership with epoch-fenced keys
//! - [`orchestrator`]: the host-facing engine combining all of it with
//!   injected [`storage`], [`directory`], and transport capabilities
//!
//! The engine does no I/O of its own. Hosts inject async capabilities and
//! feed received bytes into the orchestrator; everything that leaves through
//! the transport is already encrypted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use murmur_core::keys::KeyStore;
//! use murmur_core::orchestrator::Orchestrator;
//! use murmur_core::storage::MemoryStorage;
//! use murmur_proto::MessageContent;
//!
//! # async fn run(directory: Arc<dyn murmur_core::directory::Directory>,
//! #              transport: Arc<dyn murmur_core::directory::Transport>)
//! #              -> Result<(), murmur_core::errors::EngineError> {
//! let keystore = KeyStore::new(1, 1);
//! let engine = Orchestrator::new(
//!     "alice",
//!     keystore,
//!     Arc::new(MemoryStorage::new()),
//!     directory,
//!     transport,
//! );
//!
//! let content = MessageContent::text("hello", 1_700_000_000_000);
//! engine.send_message("bob", content).await?;
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod errors;
pub mod expiry;
pub mod group;
pub mod keys;
pub mod orchestrator;
pub mod ratchet;
pub mod registry;
pub mod replay;
pub mod session;
pub mod storage;

pub use directory::{Directory, DirectoryError, Transport};
pub use errors::EngineError;
pub use expiry::ExpiryScheduler;
pub use group::{GroupMember, GroupSession, Proposal, ProposalKind, WelcomeMessage};
pub use keys::{KeyPackage, KeyStore, PreKeyBundle};
pub use orchestrator::Orchestrator;
pub use session::{Session, SessionState};
pub use storage::{MemoryStorage, Storage, StorageError};
