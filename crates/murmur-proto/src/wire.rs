//! Bit-exact envelope framing and the pairwise ratchet message codec.
//!
//! The group envelope layout is fixed and independently parseable:
//!
//! ```text
//! [nonce 12B][u32 BE aad_len][aad][AEAD ciphertext]
//! ```
//!
//! The associated data inside is a CBOR-encoded [`GroupAad`] binding the
//! ciphertext to an epoch, a sender, and a timestamp; opening the envelope
//! under a different epoch's key fails authentication.
//!
//! Pairwise ratchet messages have no bit-exactness requirement and use CBOR
//! like the rest of the payload layer.
//!
//! # Invariants
//!
//! - Group envelope decode validates all lengths before allocating; a
//!   truncated or length-inconsistent buffer never partially parses.
//! - Round-trip encoding must produce identical values.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WireError};

/// AEAD nonce size used throughout the envelope formats
pub const NONCE_SIZE: usize = 12;

/// A framed group message: nonce, associated data, ciphertext.
///
/// # Security
///
/// Structural validity only. Decoding proves the framing is consistent,
/// not that the ciphertext authenticates; the AEAD open happens later
/// under the group's epoch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEnvelope {
    /// AEAD nonce, fresh per message
    pub nonce: [u8; NONCE_SIZE],
    /// CBOR-encoded [`GroupAad`], authenticated but not encrypted
    pub aad: Vec<u8>,
    /// AEAD ciphertext including the tag
    pub ciphertext: Vec<u8>,
}

impl GroupEnvelope {
    /// Encode into the bit-exact wire layout.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.nonce);
        dst.put_u32(self.aad.len() as u32);
        dst.put_slice(&self.aad);
        dst.put_slice(&self.ciphertext);
    }

    /// Encode into a byte vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NONCE_SIZE + 4 + self.aad.len() + self.ciphertext.len());
        self.encode(&mut buf);
        buf
    }

    /// Decode from the bit-exact wire layout.
    ///
    /// # Errors
    ///
    /// - `Truncated` if the buffer is shorter than nonce plus length prefix
    /// - `LengthPrefixMismatch` if the AAD length prefix claims more bytes
    ///   than remain in the buffer
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const HEADER: usize = NONCE_SIZE + 4;
        if bytes.len() < HEADER {
            return Err(WireError::Truncated { expected: HEADER, actual: bytes.len() });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);

        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&bytes[NONCE_SIZE..HEADER]);
        let aad_len = u32::from_be_bytes(prefix) as usize;

        let body = &bytes[HEADER..];
        if body.len() < aad_len {
            return Err(WireError::LengthPrefixMismatch {
                claimed: aad_len,
                available: body.len(),
            });
        }

        Ok(Self {
            nonce,
            aad: body[..aad_len].to_vec(),
            ciphertext: body[aad_len..].to_vec(),
        })
    }
}

/// Associated data authenticated with every group message
///
/// The epoch inside is the receiver's fence: a mismatch against the group's
/// current epoch rejects the message before any key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAad {
    /// Epoch the sender encrypted under
    pub epoch: u64,
    /// Sender's user id
    pub sender: String,
    /// Sender-side unix timestamp in milliseconds
    pub timestamp: u64,
}

impl GroupAad {
    /// Encode as CBOR bytes for the envelope's AAD slot.
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

    /// Decode from the envelope's AAD slot.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CborDecode` if the bytes are not valid AAD.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
    }
}

/// X3DH bootstrap header attached to the first messages of a session
///
/// Present until the responder has acknowledged the session; lets the
/// responder run its side of the key agreement from the message alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyHeader {
    /// Initiator's long-lived identity DH public key
    pub identity_key: [u8; 32],
    /// Initiator's device registration id
    pub registration_id: u32,
    /// Id of the signed prekey the initiator used
    pub signed_prekey_id: u32,
    /// Id of the one-time prekey the initiator consumed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_prekey_id: Option<u32>,
}

/// A single pairwise ratchet message
///
/// Travels inside [`crate::EncryptedMessage::ciphertext`]; the sender's
/// current ratchet public key rides in the outer envelope so the receiver
/// can select a receiving chain without parsing this structure first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// X3DH bootstrap material, present on session-opening messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prekey: Option<PreKeyHeader>,
    /// Message index within the sending chain
    pub index: u32,
    /// Length of the sender's previous sending chain
    pub previous_counter: u32,
    /// AEAD nonce, fresh per message
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD ciphertext including the tag
    pub ciphertext: Vec<u8>,
}

impl RatchetMessage {
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
    /// Returns `WireError::CborDecode` if the bytes are not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
    }
}
