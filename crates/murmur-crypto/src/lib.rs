//! Murmur Cryptographic Primitives
//!
//! Building blocks for the Murmur end-to-end encryption core. Two layers
//! live here, neither of which holds protocol state:
//!
//! - [`primitives`]: KDF, AEAD, Diffie-Hellman, signatures, and hashing as
//!   pure functions over byte buffers.
//! - [`hybrid`]: the post-quantum hybrid layer, combining a Kyber-768 KEM
//!   with the classical AEAD, plus Dilithium-3 replay-protected signature
//!   packets and epoch key rotation.
//!
//! # Key Lifecycle
//!
//! ```text
//! X3DH / KEM shared secret
//!        │
//!        ▼
//! HKDF → Root Key ─────► Chain Key (per direction)
//!        │                     │
//!        ▼                     ▼
//! DH ratchet step        HMAC ratchet → Message Keys
//!                               │
//!                               ▼
//!                 ChaCha20-Poly1305 → Ciphertext
//! ```
//!
//! # Security
//!
//! - Forward secrecy: chain keys are zeroized when advanced; message keys
//!   are zeroized on drop after a single use.
//! - Fail closed: AEAD open and signature verification return typed errors
//!   on any mismatch, never partial plaintext.
//! - Callers owning secret inputs can wipe them explicitly with
//!   [`primitives::wipe`] once an operation completes.

pub mod error;
pub mod hybrid;
pub mod primitives;

pub use error::CryptoError;
