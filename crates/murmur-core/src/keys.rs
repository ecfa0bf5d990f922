//! Identity and prekey material.
//!
//! A device owns one long-lived [`IdentityKeyPair`], a medium-term
//! [`SignedPreKey`] rotated on a cadence, and a pool of single-use
//! [`OneTimePreKey`]s published in bulk. [`KeyStore`] holds all of it and
//! enforces the pool discipline:
//!
//! - a one-time prekey moves strictly forward through its lifecycle:
//!   pooled, then published in exactly one bundle, then consumed **at most
//!   once** when a session referencing it is accepted
//! - the pool targets [`ONE_TIME_PREKEY_TARGET`] entries and must be
//!   replenished once it drops below [`ONE_TIME_PREKEY_LOW_WATER`]
//! - rotating the signed prekey retains the superseded key for one rotation
//!   period so in-flight bundles still resolve
//!
//! # Security
//!
//! Secret halves never leave this module unencrypted; bundles and key
//! packages expose public material only.

use std::collections::HashMap;

use murmur_crypto::hybrid::{KemKeyPair, SigningKeyPair, quantum_safe_sign};
use murmur_crypto::primitives::dh::DhKeyPair;
use murmur_crypto::primitives::sign::{self, SigningKey};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Target one-time prekey pool size
pub const ONE_TIME_PREKEY_TARGET: usize = 100;

/// Pool size below which the caller must replenish
pub const ONE_TIME_PREKEY_LOW_WATER: usize = 20;

/// Oldest entries pruned when rotation finds the pool above target
const PRUNE_COUNT: usize = 50;

/// Long-lived per-device identity: one DH half, one signing half.
///
/// Created once at first initialization; persists for the device lifetime.
pub struct IdentityKeyPair {
    /// X25519 half used in X3DH agreements
    pub dh: DhKeyPair,
    /// Ed25519 half used to attest signed prekeys
    pub signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    #[must_use]
    pub fn generate() -> Self {
        Self { dh: DhKeyPair::generate(), signing: sign::generate_signing_key() }
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    // Never prints secret halves
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").finish_non_exhaustive()
    }
}

/// Medium-term DH prekey, attested by the identity signing key
pub struct SignedPreKey {
    /// Prekey id, unique per device
    pub id: u32,
    /// The DH keypair itself
    pub pair: DhKeyPair,
    /// Ed25519 signature over the public half
    pub signature: [u8; 64],
    /// Unix timestamp (seconds) when this prekey was created
    pub created_at: u64,
}

impl SignedPreKey {
    fn generate(id: u32, identity: &IdentityKeyPair, now_secs: u64) -> Self {
        let pair = DhKeyPair::generate();
        let signature = sign::sign(&identity.signing, pair.public().as_bytes());
        Self { id, pair, signature, created_at: now_secs }
    }
}

/// Single-use DH prekey from the published pool
pub struct OneTimePreKey {
    /// Prekey id, unique per device
    pub id: u32,
    /// The DH keypair itself
    pub pair: DhKeyPair,
}

/// Public-only snapshot used to bootstrap a session with an offline peer
///
/// Fetched from the external directory; contains no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Registration id of the publishing device's identity
    pub registration_id: u32,
    /// Device id within the identity
    pub device_id: u32,
    /// Id of the one-time prekey included in this bundle
    pub prekey_id: u32,
    /// One-time prekey public key
    pub prekey: [u8; 32],
    /// Id of the signed prekey included in this bundle
    pub signed_prekey_id: u32,
    /// Signed prekey public key
    pub signed_prekey: [u8; 32],
    /// Identity signature over the signed prekey public key
    #[serde(with = "signature_serde")]
    pub signed_prekey_signature: [u8; 64],
    /// Identity DH public key
    pub identity_key: [u8; 32],
    /// Identity Ed25519 verifying key
    pub signing_key: [u8; 32],
}

/// Serde does not derive for arrays past 32 entries; carry the 64-byte
/// signature as a CBOR byte string.
mod signature_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(signature: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(signature)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| D::Error::invalid_length(len, &"a 64-byte signature"))
    }
}

/// Public key material a member publishes for group membership
///
/// Serialized as CBOR; this is the leaf committed into the group tree hash
/// and the address for hybrid-encrypted welcome delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage {
    /// Owning user id
    pub user_id: String,
    /// X25519 public key
    pub dh_public: [u8; 32],
    /// Kyber-768 public key for welcome delivery
    pub kem_public: Vec<u8>,
    /// Ed25519 verifying key
    pub signing_public: [u8; 32],
}

impl KeyPackage {
    /// Encode as CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns `Wire` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| murmur_proto::WireError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns `Wire` if the bytes are not a valid key package.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let package = ciborium::de::from_reader(bytes)
            .map_err(|e| murmur_proto::WireError::CborDecode(e.to_string()))?;
        Ok(package)
    }
}

/// All key material owned by the local device
///
/// # Invariants
///
/// - Prekey ids strictly increase; an id is never reissued.
/// - [`generate_prekey_bundle`] moves a prekey from the pool to the
///   published set; [`take_one_time_prekey`] consumes it from there. There
///   is no path that returns a prekey to the pool.
///
/// [`take_one_time_prekey`]: KeyStore::take_one_time_prekey
/// [`generate_prekey_bundle`]: KeyStore::generate_prekey_bundle
pub struct KeyStore {
    /// The device identity
    pub identity: IdentityKeyPair,
    /// Kyber-768 keypair for hybrid-encrypted payloads addressed to us
    pub kem: KemKeyPair,
    /// Dilithium-3 keypair for attesting published records
    pub pq_signing: SigningKeyPair,
    /// Current signed prekey
    pub signed_prekey: SignedPreKey,
    /// Superseded signed prekey, kept for one rotation period
    pub previous_signed_prekey: Option<SignedPreKey>,
    one_time_prekeys: Vec<OneTimePreKey>,
    published_prekeys: HashMap<u32, OneTimePreKey>,
    next_prekey_id: u32,
    registration_id: u32,
    device_id: u32,
}

impl KeyStore {
    /// Create a store with a fresh identity and a full one-time prekey pool.
    #[must_use]
    pub fn new(registration_id: u32, device_id: u32) -> Self {
        let identity = IdentityKeyPair::generate();
        let signed_prekey = SignedPreKey::generate(1, &identity, now_secs());

        let mut store = Self {
            identity,
            kem: KemKeyPair::generate(),
            pq_signing: SigningKeyPair::generate(),
            signed_prekey,
            previous_signed_prekey: None,
            one_time_prekeys: Vec::new(),
            published_prekeys: HashMap::new(),
            next_prekey_id: 2,
            registration_id,
            device_id,
        };
        store.replenish_one_time_prekeys();
        store
    }

    /// Registration id of this device's identity.
    #[must_use]
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Number of one-time prekeys currently in the pool.
    #[must_use]
    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// True once the pool has dropped below the low-water mark.
    #[must_use]
    pub fn needs_replenishment(&self) -> bool {
        self.one_time_prekeys.len() < ONE_TIME_PREKEY_LOW_WATER
    }

    /// Build a public bundle for publication, drawing one prekey from the
    /// pool.
    ///
    /// The selected one-time prekey leaves the pool and is parked as
    /// published, waiting for the session that references it; it will never
    /// appear in another bundle.
    ///
    /// # Errors
    ///
    /// Returns `KeyExhausted` when the pool is empty. The caller must call
    /// [`replenish_one_time_prekeys`](Self::replenish_one_time_prekeys)
    /// before further bundle requests.
    pub fn generate_prekey_bundle(&mut self) -> Result<PreKeyBundle, EngineError> {
        if self.one_time_prekeys.is_empty() {
            return Err(EngineError::KeyExhausted);
        }

        let picked = rand::rngs::OsRng.gen_range(0..self.one_time_prekeys.len());
        let one_time = self.one_time_prekeys.swap_remove(picked);

        tracing::debug!(
            prekey_id = one_time.id,
            remaining = self.one_time_prekeys.len(),
            "one-time prekey published in bundle"
        );

        let bundle = PreKeyBundle {
            registration_id: self.registration_id,
            device_id: self.device_id,
            prekey_id: one_time.id,
            prekey: one_time.pair.public().to_bytes(),
            signed_prekey_id: self.signed_prekey.id,
            signed_prekey: self.signed_prekey.pair.public().to_bytes(),
            signed_prekey_signature: self.signed_prekey.signature,
            identity_key: self.identity.dh.public().to_bytes(),
            signing_key: self.identity.signing.verifying_key().to_bytes(),
        };
        self.published_prekeys.insert(one_time.id, one_time);
        Ok(bundle)
    }

    /// Consume the published one-time prekey with the given id, if present.
    ///
    /// Used by the responder side of session establishment; at-most-once
    /// consumption means a second call with the same id returns `None`.
    pub fn take_one_time_prekey(&mut self, id: u32) -> Option<OneTimePreKey> {
        self.published_prekeys.remove(&id)
    }

    /// Borrow a published one-time prekey without consuming it.
    ///
    /// Lets the responder run the full agreement and authenticate the first
    /// message before committing to consumption.
    #[must_use]
    pub(crate) fn published_one_time_prekey(&self, id: u32) -> Option<&OneTimePreKey> {
        self.published_prekeys.get(&id)
    }

    /// Look up a signed prekey by id, including the superseded one.
    #[must_use]
    pub fn signed_prekey_by_id(&self, id: u32) -> Option<&SignedPreKey> {
        if self.signed_prekey.id == id {
            return Some(&self.signed_prekey);
        }
        self.previous_signed_prekey.as_ref().filter(|k| k.id == id)
    }

    /// Rotate the signed prekey.
    ///
    /// The outgoing prekey is retained as superseded for one rotation period
    /// so in-flight bundles still resolve; whatever was superseded before is
    /// discarded. If the one-time pool has grown past its target, the oldest
    /// entries (lowest ids) are pruned.
    pub fn rotate_signed_prekey(&mut self) {
        let id = self.next_id();
        let fresh = SignedPreKey::generate(id, &self.identity, now_secs());
        self.previous_signed_prekey = Some(std::mem::replace(&mut self.signed_prekey, fresh));

        if self.one_time_prekeys.len() > ONE_TIME_PREKEY_TARGET {
            self.one_time_prekeys.sort_by_key(|k| k.id);
            let pruned: Vec<u32> =
                self.one_time_prekeys.drain(..PRUNE_COUNT).map(|k| k.id).collect();
            tracing::debug!(count = pruned.len(), "pruned oldest one-time prekeys");
        }

        tracing::debug!(signed_prekey_id = self.signed_prekey.id, "signed prekey rotated");
    }

    /// Refill the one-time prekey pool to its target size.
    pub fn replenish_one_time_prekeys(&mut self) {
        while self.one_time_prekeys.len() < ONE_TIME_PREKEY_TARGET {
            let id = self.next_id();
            self.one_time_prekeys.push(OneTimePreKey { id, pair: DhKeyPair::generate() });
        }
    }

    /// The key package this device publishes for group membership.
    #[must_use]
    pub fn key_package(&self, user_id: impl Into<String>) -> KeyPackage {
        KeyPackage {
            user_id: user_id.into(),
            dh_public: self.identity.dh.public().to_bytes(),
            kem_public: self.kem.public.as_bytes().to_vec(),
            signing_public: self.identity.signing.verifying_key().to_bytes(),
        }
    }

    /// Attest a published record with a replay-protected post-quantum
    /// signature packet.
    #[must_use]
    pub fn attest(&self, record: &[u8]) -> Vec<u8> {
        quantum_safe_sign(record, &self.pq_signing)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_prekey_id;
        self.next_prekey_id = self.next_prekey_id.wrapping_add(1);
        id
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("registration_id", &self.registration_id)
            .field("device_id", &self.device_id)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("published_prekeys", &self.published_prekeys.len())
            .finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use murmur_crypto::primitives::sign::verify;

    use super::*;

    #[test]
    fn new_store_has_full_pool() {
        let store = KeyStore::new(1, 1);
        assert_eq!(store.one_time_prekey_count(), ONE_TIME_PREKEY_TARGET);
        assert!(!store.needs_replenishment());
    }

    #[test]
    fn signed_prekey_signature_verifies() {
        let store = KeyStore::new(1, 1);
        verify(
            &store.identity.signing.verifying_key(),
            store.signed_prekey.pair.public().as_bytes(),
            &store.signed_prekey.signature,
        )
        .unwrap();
    }

    #[test]
    fn bundle_moves_a_prekey_out_of_the_pool() {
        let mut store = KeyStore::new(1, 1);
        let bundle = store.generate_prekey_bundle().unwrap();
        assert_eq!(store.one_time_prekey_count(), ONE_TIME_PREKEY_TARGET - 1);

        // Published, waiting for the session that references it
        let taken = store.take_one_time_prekey(bundle.prekey_id).unwrap();
        assert_eq!(taken.pair.public().to_bytes(), bundle.prekey);
    }

    #[test]
    fn exhausted_pool_returns_key_exhausted() {
        let mut store = KeyStore::new(1, 1);
        for _ in 0..ONE_TIME_PREKEY_TARGET {
            store.generate_prekey_bundle().unwrap();
        }
        assert!(matches!(store.generate_prekey_bundle(), Err(EngineError::KeyExhausted)));

        // Replenishment unblocks bundle generation
        store.replenish_one_time_prekeys();
        store.generate_prekey_bundle().unwrap();
    }

    #[test]
    fn low_water_mark_flags_replenishment() {
        let mut store = KeyStore::new(1, 1);
        for _ in 0..(ONE_TIME_PREKEY_TARGET - ONE_TIME_PREKEY_LOW_WATER + 1) {
            store.generate_prekey_bundle().unwrap();
        }
        assert!(store.needs_replenishment());
    }

    #[test]
    fn take_one_time_prekey_is_at_most_once() {
        let mut store = KeyStore::new(1, 1);
        let bundle = store.generate_prekey_bundle().unwrap();

        assert!(store.take_one_time_prekey(bundle.prekey_id).is_some());
        assert!(store.take_one_time_prekey(bundle.prekey_id).is_none());
    }

    #[test]
    fn unpooled_prekey_cannot_be_taken() {
        let mut store = KeyStore::new(1, 1);
        // Ids still sitting in the pool are not consumable; only published
        // prekeys are
        assert!(store.take_one_time_prekey(5).is_none());
    }

    #[test]
    fn rotation_supersedes_and_retains_previous() {
        let mut store = KeyStore::new(1, 1);
        let old_id = store.signed_prekey.id;
        store.rotate_signed_prekey();

        assert_ne!(store.signed_prekey.id, old_id);
        assert!(store.signed_prekey_by_id(old_id).is_some(), "superseded key must resolve");

        // A second rotation discards the first key
        store.rotate_signed_prekey();
        assert!(store.signed_prekey_by_id(old_id).is_none());
    }

    #[test]
    fn rotation_prunes_oversized_pool() {
        let mut store = KeyStore::new(1, 1);
        // Grow the pool past target
        for _ in 0..20 {
            let id = store.next_id();
            store.one_time_prekeys.push(OneTimePreKey { id, pair: DhKeyPair::generate() });
        }
        assert_eq!(store.one_time_prekey_count(), ONE_TIME_PREKEY_TARGET + 20);

        store.rotate_signed_prekey();
        assert_eq!(store.one_time_prekey_count(), ONE_TIME_PREKEY_TARGET + 20 - 50);
    }

    #[test]
    fn prekey_bundle_round_trips_through_cbor() {
        let mut store = KeyStore::new(1, 1);
        let bundle = store.generate_prekey_bundle().unwrap();

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&bundle, &mut bytes).unwrap();
        let decoded: PreKeyBundle = ciborium::de::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded, bundle);
        assert_eq!(decoded.signed_prekey_signature, store.signed_prekey.signature);
    }

    #[test]
    fn key_package_round_trip() {
        let store = KeyStore::new(1, 1);
        let package = store.key_package("alice");
        let bytes = package.to_bytes().unwrap();
        assert_eq!(KeyPackage::from_bytes(&bytes).unwrap(), package);
    }

    #[test]
    fn attestation_verifies() {
        let store = KeyStore::new(1, 1);
        let packet = store.attest(b"published record");
        murmur_crypto::hybrid::quantum_safe_verify(
            b"published record",
            &packet,
            store.pq_signing.public_bytes(),
        )
        .unwrap();
    }
}
