//! Pairwise session state: chain keys, receiving chains, DH ratchet.
//!
//! A [`Session`] holds everything one peer relationship needs: the root key,
//! the current sending chain with its DH ratchet keypair, and up to
//! [`MAX_RECEIVING_CHAINS`] receiving chains keyed by the fingerprint of the
//! sender's ratchet public key.
//!
//! # Key Lifecycle
//!
//! ```text
//! X3DH master secret
//!        │
//!        ▼
//!   Root Key ──DH ratchet step──► Root Key' ──► ...
//!        │                            │
//!        ▼                            ▼
//!   Chain Key ──advance──► keys   Chain Key'
//! ```
//!
//! # Security
//!
//! - Chain keys are zeroized when advanced; evicted receiving chains are
//!   zeroized before removal (their `Drop` impls handle both).
//! - Skipped message keys are cached for out-of-order delivery, bounded by
//!   [`MAX_SKIP`] per chain.
//! - `close()` wipes all key material; a closed session refuses further use.

use std::collections::HashMap;

use murmur_crypto::primitives::dh::{DhKeyPair, public_key_from_bytes};
use murmur_crypto::primitives::{aead, hash, kdf};
use murmur_proto::{PreKeyHeader, RatchetMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::EngineError;

/// Maximum concurrent receiving chains per session (K)
pub const MAX_RECEIVING_CHAINS: usize = 5;

/// Maximum message keys skipped ahead within one chain
pub const MAX_SKIP: u32 = 1000;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// X3DH completed, no DH ratchet step yet
    Established,
    /// At least one DH ratchet step has occurred
    Ratcheting,
    /// Securely deleted; terminal
    Closed,
}

/// A forward-secure symmetric chain.
///
/// Advancing derives the message key for the current index, caches it for
/// resend/out-of-order use, derives the successor chain key, and zeroizes
/// the old one.
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
    message_keys: HashMap<u32, [u8; 32]>,
}

impl ChainKey {
    /// Start a chain at index 0 from a derived seed.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key, index: 0, message_keys: HashMap::new() }
    }

    /// Next index to be used on this chain.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Derive the message key at the current index and advance the chain.
    pub fn advance(&mut self) -> [u8; 32] {
        let message_key = kdf::message_key(&self.key);
        let next = kdf::next_chain_key(&self.key);

        self.message_keys.insert(self.index, message_key);
        self.key.zeroize();
        self.key = next;
        self.index = self.index.wrapping_add(1);
        message_key
    }

    /// Message key for `target`, advancing and caching skipped keys.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailure` if `target` is behind the chain with no
    /// cached key (its key was already consumed and wiped), or more than
    /// [`MAX_SKIP`] ahead.
    pub fn message_key_at(&mut self, target: u32) -> Result<[u8; 32], EngineError> {
        if target < self.index {
            return self.message_keys.get(&target).copied().ok_or(EngineError::DecryptionFailure);
        }
        if target.wrapping_sub(self.index) > MAX_SKIP {
            return Err(EngineError::DecryptionFailure);
        }

        let mut key = self.advance();
        while self.index <= target {
            key = self.advance();
        }
        Ok(key)
    }

    fn to_record(&self) -> ChainKeyRecord {
        ChainKeyRecord {
            key: self.key,
            index: self.index,
            message_keys: self.message_keys.iter().map(|(i, k)| (*i, *k)).collect(),
        }
    }

    fn from_record(record: ChainKeyRecord) -> Self {
        Self {
            key: record.key,
            index: record.index,
            message_keys: record.message_keys.into_iter().collect(),
        }
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
        for key in self.message_keys.values_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for ChainKey {
    // Never prints key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .field("cached_keys", &self.message_keys.len())
            .finish_non_exhaustive()
    }
}

/// Serialized chain state for encrypted persistence
#[derive(Serialize, Deserialize)]
struct ChainKeyRecord {
    key: [u8; 32],
    index: u32,
    message_keys: Vec<(u32, [u8; 32])>,
}

struct ReceivingChain {
    fingerprint: [u8; 32],
    chain: ChainKey,
}

/// Per-peer double ratchet session
///
/// # Invariants
///
/// - At most [`MAX_RECEIVING_CHAINS`] receiving chains; overflow evicts the
///   least-advanced chain by message index, zeroizing its material.
/// - All mutations commit only after every fallible step has succeeded; a
///   failed decrypt leaves the session exactly as it was.
pub struct Session {
    /// Unique session id
    pub session_id: Uuid,
    /// The remote peer this session belongs to
    pub peer_id: String,
    /// Remote identity DH public key
    pub remote_identity_key: [u8; 32],
    /// Remote device registration id
    pub remote_registration_id: u32,
    root_key: [u8; 32],
    dh_self: DhKeyPair,
    sending_chain: ChainKey,
    receiving_chains: Vec<ReceivingChain>,
    previous_counter: u32,
    state: SessionState,
    pending_prekey: Option<PreKeyHeader>,
}

impl Session {
    /// Assemble a session from X3DH output. Used by the ratchet engine only.
    pub(crate) fn from_x3dh(
        peer_id: String,
        remote_identity_key: [u8; 32],
        remote_registration_id: u32,
        root_key: [u8; 32],
        dh_self: DhKeyPair,
        sending_chain: ChainKey,
        pending_prekey: Option<PreKeyHeader>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            peer_id,
            remote_identity_key,
            remote_registration_id,
            root_key,
            dh_self,
            sending_chain,
            receiving_chains: Vec::new(),
            previous_counter: 0,
            state: SessionState::Established,
            pending_prekey,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Public half of the current DH ratchet keypair.
    #[must_use]
    pub fn ratchet_public_key(&self) -> [u8; 32] {
        self.dh_self.public().to_bytes()
    }

    /// Register a receiving chain directly. Used at session acceptance to
    /// install the X3DH bootstrap chain under the initiator's ephemeral key.
    pub(crate) fn register_receiving_chain(&mut self, ratchet_public: [u8; 32], chain: ChainKey) {
        self.insert_receiving_chain(hash::sha256(&ratchet_public), chain);
    }

    /// Perform the responder's first DH ratchet step at acceptance, creating
    /// a sending chain the initiator can derive symmetrically.
    pub(crate) fn ratchet_sending_chain(
        &mut self,
        their_ratchet_public: [u8; 32],
    ) -> Result<(), EngineError> {
        let their_public = public_key_from_bytes(&their_ratchet_public)?;
        let fresh = DhKeyPair::generate();
        let dh_output = fresh.diffie_hellman(&their_public);

        let (new_root, chain_seed) = kdf::derive_root(&self.root_key, dh_output.as_ref());
        self.previous_counter = self.sending_chain.index();
        self.root_key.zeroize();
        self.root_key = new_root;
        self.dh_self = fresh;
        self.sending_chain = ChainKey::new(chain_seed);
        self.state = SessionState::Ratcheting;
        Ok(())
    }

    /// Encrypt a plaintext on the sending chain.
    ///
    /// Advances the chain by one and returns the wire message; the caller
    /// puts [`Self::ratchet_public_key`] into the outer envelope.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session is closed.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, EngineError> {
        self.ensure_open()?;

        let index = self.sending_chain.index();
        let message_key = self.sending_chain.advance();
        let nonce = aead::generate_nonce();
        let aad = message_aad(&self.ratchet_public_key(), index);
        let ciphertext = aead::seal(&message_key, &nonce, plaintext, &aad);

        tracing::trace!(peer = %self.peer_id, index, "message encrypted on sending chain");

        Ok(RatchetMessage {
            prekey: self.pending_prekey.clone(),
            index,
            previous_counter: self.previous_counter,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt a wire message arriving under `their_ratchet_public`.
    ///
    /// Selects the receiving chain matching the key's fingerprint; if none
    /// exists, performs a DH ratchet step first (bounded to
    /// [`MAX_RECEIVING_CHAINS`] chains; the least-advanced chain is evicted
    /// and zeroized).
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the session is closed
    /// - `DecryptionFailure` on tag mismatch, a consumed message index, or a
    ///   skip beyond [`MAX_SKIP`]
    pub fn decrypt(
        &mut self,
        their_ratchet_public: [u8; 32],
        message: &RatchetMessage,
    ) -> Result<Vec<u8>, EngineError> {
        self.ensure_open()?;

        let fingerprint = hash::sha256(&their_ratchet_public);
        let aad = message_aad(&their_ratchet_public, message.index);

        if let Some(entry) = self
            .receiving_chains
            .iter_mut()
            .find(|c| hash::digest_eq(&c.fingerprint, &fingerprint))
        {
            // Stage the advance on a copy; commit only after the ciphertext
            // authenticates, so a failed open leaves the chain untouched.
            let mut staged = ChainKey::from_record(entry.chain.to_record());
            let message_key = staged.message_key_at(message.index)?;
            let plaintext =
                aead::open(&message_key, &message.nonce, &message.ciphertext, &aad)?;
            entry.chain = staged;
            return Ok(plaintext);
        }

        // Unknown ratchet key: derive the new receiving chain, but commit
        // nothing until the message authenticates under it.
        let their_public = public_key_from_bytes(&their_ratchet_public)?;
        let dh_output = self.dh_self.diffie_hellman(&their_public);
        let (new_root, chain_seed) = kdf::derive_root(&self.root_key, dh_output.as_ref());

        let mut chain = ChainKey::new(chain_seed);
        let message_key = chain.message_key_at(message.index)?;
        let plaintext = aead::open(&message_key, &message.nonce, &message.ciphertext, &aad)?;

        // Authenticated: commit the ratchet step and step our sending side
        // so the reply travels under a fresh key.
        self.root_key.zeroize();
        self.root_key = new_root;
        self.insert_receiving_chain(fingerprint, chain);

        let fresh = DhKeyPair::generate();
        let dh_send = fresh.diffie_hellman(&their_public);
        let (next_root, send_seed) = kdf::derive_root(&self.root_key, dh_send.as_ref());
        self.previous_counter = self.sending_chain.index();
        self.root_key.zeroize();
        self.root_key = next_root;
        self.dh_self = fresh;
        self.sending_chain = ChainKey::new(send_seed);
        self.state = SessionState::Ratcheting;
        self.pending_prekey = None;

        tracing::debug!(peer = %self.peer_id, "dh ratchet step completed");
        Ok(plaintext)
    }

    /// Securely delete this session: wipe all key material, mark closed.
    pub fn close(&mut self) {
        self.root_key.zeroize();
        self.receiving_chains.clear();
        self.sending_chain = ChainKey::new([0u8; 32]);
        self.pending_prekey = None;
        self.state = SessionState::Closed;
        tracing::debug!(peer = %self.peer_id, "session closed and wiped");
    }

    /// Serialize for encrypted persistence.
    ///
    /// # Errors
    ///
    /// Returns `Wire` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let record = SessionRecord {
            session_id: self.session_id,
            peer_id: self.peer_id.clone(),
            remote_identity_key: self.remote_identity_key,
            remote_registration_id: self.remote_registration_id,
            root_key: self.root_key,
            dh_secret: *self.dh_self.secret_bytes(),
            sending_chain: self.sending_chain.to_record(),
            receiving_chains: self
                .receiving_chains
                .iter()
                .map(|c| (c.fingerprint, c.chain.to_record()))
                .collect(),
            previous_counter: self.previous_counter,
            state: self.state,
            pending_prekey: self.pending_prekey.clone(),
        };

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&record, &mut buf)
            .map_err(|e| murmur_proto::WireError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Restore from encrypted persistence.
    ///
    /// # Errors
    ///
    /// Returns `Wire` if the bytes are not a valid session record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let record: SessionRecord = ciborium::de::from_reader(bytes)
            .map_err(|e| murmur_proto::WireError::CborDecode(e.to_string()))?;

        Ok(Self {
            session_id: record.session_id,
            peer_id: record.peer_id,
            remote_identity_key: record.remote_identity_key,
            remote_registration_id: record.remote_registration_id,
            root_key: record.root_key,
            dh_self: DhKeyPair::from_secret_bytes(record.dh_secret),
            sending_chain: ChainKey::from_record(record.sending_chain),
            receiving_chains: record
                .receiving_chains
                .into_iter()
                .map(|(fingerprint, chain)| ReceivingChain {
                    fingerprint,
                    chain: ChainKey::from_record(chain),
                })
                .collect(),
            previous_counter: record.previous_counter,
            state: record.state,
            pending_prekey: record.pending_prekey,
        })
    }

    fn insert_receiving_chain(&mut self, fingerprint: [u8; 32], chain: ChainKey) {
        if self.receiving_chains.len() >= MAX_RECEIVING_CHAINS {
            // Least-advanced chain by message index, oldest on ties; eviction
            // runs before the push so the incoming chain never evicts itself.
            // ChainKey::drop zeroizes the material.
            if let Some(position) = self
                .receiving_chains
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.chain.index())
                .map(|(position, _)| position)
            {
                let evicted = self.receiving_chains.remove(position);
                tracing::debug!(
                    peer = %self.peer_id,
                    evicted_index = evicted.chain.index(),
                    "receiving chain evicted"
                );
            }
        }
        self.receiving_chains.push(ReceivingChain { fingerprint, chain });
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.state == SessionState::Closed {
            return Err(EngineError::SessionNotFound { peer_id: self.peer_id.clone() });
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state)
            .field("receiving_chains", &self.receiving_chains.len())
            .finish_non_exhaustive()
    }
}

/// Serialized session for encrypted persistence
#[derive(Serialize, Deserialize)]
struct SessionRecord {
    session_id: Uuid,
    peer_id: String,
    remote_identity_key: [u8; 32],
    remote_registration_id: u32,
    root_key: [u8; 32],
    dh_secret: [u8; 32],
    sending_chain: ChainKeyRecord,
    receiving_chains: Vec<([u8; 32], ChainKeyRecord)>,
    previous_counter: u32,
    state: SessionState,
    pending_prekey: Option<PreKeyHeader>,
}

/// Associated data binding a pairwise ciphertext to its ratchet key and index
fn message_aad(ratchet_public: &[u8; 32], index: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(36);
    aad.extend_from_slice(ratchet_public);
    aad.extend_from_slice(&index.to_be_bytes());
    aad
}
