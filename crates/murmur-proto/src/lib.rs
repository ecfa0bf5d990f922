//! Wire envelope codecs and message content types.
//!
//! Envelope framing is raw big-endian binary so the formats are bit-exact
//! and independently parseable; message content uses CBOR for type safety
//! and forward compatibility. The split mirrors the layering above:
//!
//! - [`envelope`]: the `EncryptedMessage` transport envelope, the only
//!   structure that crosses the transport boundary.
//! - [`wire`]: bit-exact group envelope framing and the pairwise ratchet
//!   message codec.
//! - [`content`]: application-level message content (text/media bodies,
//!   read receipts, reactions, ephemeral TTLs).
//!
//! This crate holds no keys and performs no cryptography; everything here
//! operates on ciphertext and public material.

pub mod content;
pub mod envelope;
pub mod errors;
pub mod wire;

pub use content::{ContentBody, MessageContent, Reaction, ReadReceipt};
pub use envelope::{EncryptedMessage, MessageType};
pub use errors::WireError;
pub use wire::{GroupAad, GroupEnvelope, PreKeyHeader, RatchetMessage};
