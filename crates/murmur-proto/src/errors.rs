//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Convenience alias for wire codec results
pub type Result<T> = core::result::Result<T, WireError>;

/// Errors from envelope framing and content codecs
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ends before the framing says it should
    #[error("envelope truncated: need {expected} bytes, have {actual}")]
    Truncated {
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

    /// CBOR serialization failed
    #[error("cbor encode: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("cbor decode: {0}")]
    CborDecode(String),
}
