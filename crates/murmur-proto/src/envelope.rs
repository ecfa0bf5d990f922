//! The transport envelope.
//!
//! `EncryptedMessage` is the only structure that crosses the transport
//! boundary. Everything inside `ciphertext` is opaque to the transport:
//! for pairwise conversations it is a CBOR-encoded [`crate::RatchetMessage`],
//! for groups it is a bit-exact [`crate::GroupEnvelope`].
//!
//! # Security
//!
//! The envelope carries routing metadata in the clear (conversation id,
//! sender id, timestamp, message type). Hosts that need metadata privacy
//! must wrap the envelope at the transport layer; this crate does not.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, WireError};

/// Application-visible message type carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text
    Text,
    /// Image payload
    Image,
    /// Video payload
    Video,
    /// Audio payload
    Audio,
    /// Generic file payload
    File,
}

impl MessageType {
    /// True for payload types that receive the additional hybrid wrap.
    ///
    /// Text stays under the ratchet/group AEAD alone; media payloads get
    /// the post-quantum envelope on top.
    #[must_use]
    pub const fn is_media(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Encrypted message envelope
///
/// # Invariants
///
/// - `id` is unique per message; duplicate ids are replay candidates and
///   must be rejected by the receiver.
/// - `ephemeral_public_key` is present on pairwise messages (the sender's
///   current DH ratchet public key) and absent on group messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Unique message id
    pub id: Uuid,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Opaque ciphertext (ratchet message or group envelope)
    pub ciphertext: Vec<u8>,
    /// Sender's DH ratchet public key (pairwise only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<[u8; 32]>,
    /// Sender-side unix timestamp in milliseconds
    pub timestamp: u64,
    /// Application-visible message type
    pub message_type: MessageType,
}

impl EncryptedMessage {
    /// Encode the envelope as CBOR into a buffer.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborEncode` if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        ciborium::ser::into_writer(self, dst.writer())
            .map_err(|e| WireError::CborEncode(e.to_string()))
    }

    /// Encode the envelope as a CBOR byte vector.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborEncode` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode an envelope from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborDecode` if the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
    }
}
