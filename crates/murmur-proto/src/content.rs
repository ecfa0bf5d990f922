//! Application-level message content.
//!
//! This is the plaintext form the orchestrator serializes before handing
//! bytes to the ratchet or group engine, and what it returns to the host
//! after decryption. Encoded as CBOR; field additions stay backward
//! compatible as long as new fields are optional.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::MessageType;
use crate::errors::{Result, WireError};

/// A read receipt nested inside message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// User who read the message
    pub user_id: String,
    /// Unix timestamp in milliseconds when it was read
    pub timestamp: u64,
}

/// A reaction nested inside message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// User who reacted
    pub user_id: String,
    /// Reaction emoji
    pub emoji: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

/// The body of a message: text, or a media payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBody {
    /// Plain text body
    Text {
        /// The message text
        text: String,
    },
    /// Media body (image, video, audio, file)
    Media {
        /// What kind of media this is
        kind: MessageType,
        /// Raw media bytes
        data: Vec<u8>,
        /// Optional caption shown with the media
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl ContentBody {
    /// The envelope-level message type for this body.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Media { kind, .. } => *kind,
        }
    }
}

/// A complete application message before encryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Message id, matches the envelope id after encryption
    pub id: Uuid,
    /// The message body
    pub body: ContentBody,
    /// Sender-side unix timestamp in milliseconds
    pub timestamp: u64,
    /// Read receipts accumulated for this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_receipts: Vec<ReadReceipt>,
    /// Reactions accumulated for this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    /// Ephemeral TTL in seconds; the message is deleted locally after this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

impl MessageContent {
    /// Create a text message with a fresh id and the given timestamp.
    #[must_use]
    pub fn text(text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: ContentBody::Text { text: text.into() },
            timestamp,
            read_receipts: Vec::new(),
            reactions: Vec::new(),
            expires_in_secs: None,
        }
    }

    /// Create a media message with a fresh id and the given timestamp.
    #[must_use]
    pub fn media(kind: MessageType, data: Vec<u8>, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: ContentBody::Media { kind, data, caption: None },
            timestamp,
            read_receipts: Vec::new(),
            reactions: Vec::new(),
            expires_in_secs: None,
        }
    }

    /// Mark this message ephemeral with the given TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.expires_in_secs = Some(ttl_secs);
        self
    }

    /// Encode as CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborEncode` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| WireError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborDecode` if the bytes are not valid content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
    }
}
