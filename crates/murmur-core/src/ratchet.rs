//! X3DH session establishment.
//!
//! Both halves of the asynchronous key agreement live here:
//!
//! - [`initialize_session`]: the initiator fetches a prekey bundle and
//!   derives a session with no round trip; the ephemeral keypair generated
//!   here doubles as the first DH ratchet key.
//! - [`accept_session`] / [`accept_first_message`]: the responder
//!   reconstructs the same agreement from the bootstrap header on the first
//!   incoming message, consuming the referenced one-time prekey at most
//!   once; the first-message variant consumes nothing until the ciphertext
//!   authenticates.
//!
//! The agreement concatenates up to four DH outputs:
//!
//! ```text
//! DH1 = DH(IK_initiator,  SPK_responder)
//! DH2 = DH(EK_initiator,  IK_responder)
//! DH3 = DH(EK_initiator,  SPK_responder)
//! DH4 = DH(EK_initiator,  OPK_responder)   (when a one-time prekey is used)
//! ```
//!
//! hashed into a master secret from which the root key and the bootstrap
//! chain key are derived. Both sides reach identical values, so the
//! initiator's sending chain is the responder's first receiving chain.
//!
//! # Security
//!
//! - The responder's signed prekey attestation is verified before any DH
//!   computation; a forged bundle fails fast.
//! - All intermediate secrets (DH outputs, master secret) are held in
//!   zeroizing buffers and wiped when derivation completes.
//! - No partial session state escapes on failure: every fallible step runs
//!   before a `Session` is constructed.

use murmur_crypto::primitives::dh::{DhKeyPair, public_key_from_bytes};
use murmur_crypto::primitives::{hash, kdf, sign};
use murmur_proto::{PreKeyHeader, RatchetMessage};
use zeroize::Zeroizing;

use crate::errors::EngineError;
use crate::keys::{KeyStore, PreKeyBundle};
use crate::session::{ChainKey, Session};

/// Label for deriving the root key from the X3DH master secret
const ROOT_LABEL: &[u8] = b"murmur/x3dh/root";

/// Label for deriving the bootstrap chain key from the X3DH master secret
const CHAIN_LABEL: &[u8] = b"murmur/x3dh/chain";

/// Initiate a session toward `peer_id` from a fetched prekey bundle.
///
/// Requires no round trip with the peer. The returned session carries a
/// pending bootstrap header that rides on outgoing messages until the first
/// DH ratchet step confirms the peer has caught up.
///
/// # Errors
///
/// - `Crypto(SignatureInvalid)` if the bundle's signed prekey attestation
///   does not verify against its identity signing key
/// - `Crypto(InvalidKeyLength)` / `Crypto(MalformedKeyMaterial)` if bundle
///   key material fails to parse
pub fn initialize_session(
    keystore: &KeyStore,
    peer_id: impl Into<String>,
    bundle: &PreKeyBundle,
) -> Result<Session, EngineError> {
    let peer_id = peer_id.into();

    let their_signing = sign::verifying_key_from_bytes(&bundle.signing_key)?;
    sign::verify(&their_signing, &bundle.signed_prekey, &bundle.signed_prekey_signature)?;

    let their_identity = public_key_from_bytes(&bundle.identity_key)?;
    let their_signed_prekey = public_key_from_bytes(&bundle.signed_prekey)?;
    let their_one_time = public_key_from_bytes(&bundle.prekey)?;

    let ephemeral = DhKeyPair::generate();

    let dh1 = keystore.identity.dh.diffie_hellman(&their_signed_prekey);
    let dh2 = ephemeral.diffie_hellman(&their_identity);
    let dh3 = ephemeral.diffie_hellman(&their_signed_prekey);
    let dh4 = ephemeral.diffie_hellman(&their_one_time);

    let (root_key, chain_seed) = derive_shared(&dh1, &dh2, &dh3, Some(&dh4));

    let header = PreKeyHeader {
        identity_key: keystore.identity.dh.public().to_bytes(),
        registration_id: keystore.registration_id(),
        signed_prekey_id: bundle.signed_prekey_id,
        one_time_prekey_id: Some(bundle.prekey_id),
    };

    tracing::debug!(peer = %peer_id, "session initialized via x3dh");

    Ok(Session::from_x3dh(
        peer_id,
        bundle.identity_key,
        bundle.registration_id,
        root_key,
        ephemeral,
        ChainKey::new(chain_seed),
        Some(header),
    ))
}

/// Accept a session from the bootstrap header on a first incoming message.
///
/// `their_ratchet_public` is the initiator's ephemeral key from the message
/// envelope. The referenced one-time prekey is consumed here and can never
/// be consumed again; the referenced signed prekey may be the superseded
/// one if the bundle was fetched before a rotation.
///
/// The returned session has the bootstrap receiving chain registered and a
/// fresh sending chain from the responder's first DH ratchet step; the
/// caller decrypts the pending message through `Session::decrypt` as usual.
///
/// # Errors
///
/// - `HandshakeFailed` if the referenced signed prekey or one-time prekey
///   no longer exists (consumed, or rotated out past supersession)
/// - `Crypto(InvalidKeyLength)` if the initiator's key material is malformed
pub fn accept_session(
    keystore: &mut KeyStore,
    peer_id: impl Into<String>,
    their_ratchet_public: [u8; 32],
    header: &PreKeyHeader,
) -> Result<Session, EngineError> {
    let session = responder_session(keystore, peer_id.into(), their_ratchet_public, header)?;
    consume_one_time_prekey(keystore, header);

    tracing::debug!(peer = %session.peer_id, "session accepted via x3dh");
    Ok(session)
}

/// Accept a session directly from the first incoming message, committing
/// nothing on failure.
///
/// Runs the responder half of the agreement and requires the bootstrap
/// ciphertext to authenticate before anything sticks: only after a
/// successful open is the referenced one-time prekey consumed. On failure
/// the candidate session is dropped and the prekey stays published, so a
/// forged first message neither burns key material nor blocks the genuine
/// initiator.
///
/// # Errors
///
/// - `SessionNotFound` if the message carries no bootstrap header
/// - `HandshakeFailed` / `Crypto(InvalidKeyLength)` as for
///   [`accept_session`]
/// - `DecryptionFailure` if the first ciphertext does not authenticate
pub fn accept_first_message(
    keystore: &mut KeyStore,
    peer_id: impl Into<String>,
    their_ratchet_public: [u8; 32],
    message: &RatchetMessage,
) -> Result<(Session, Vec<u8>), EngineError> {
    let peer_id = peer_id.into();
    let Some(header) = &message.prekey else {
        return Err(EngineError::SessionNotFound { peer_id });
    };

    let mut session = responder_session(keystore, peer_id, their_ratchet_public, header)?;
    let plaintext = session.decrypt(their_ratchet_public, message)?;
    consume_one_time_prekey(keystore, header);

    tracing::debug!(peer = %session.peer_id, "session accepted via x3dh");
    Ok((session, plaintext))
}

/// Responder half of the agreement, built without consuming anything.
///
/// The referenced one-time prekey is only borrowed; the caller decides when
/// (and whether) consumption happens.
fn responder_session(
    keystore: &KeyStore,
    peer_id: String,
    their_ratchet_public: [u8; 32],
    header: &PreKeyHeader,
) -> Result<Session, EngineError> {
    let their_identity = public_key_from_bytes(&header.identity_key)?;
    let their_ephemeral = public_key_from_bytes(&their_ratchet_public)?;

    let signed_prekey =
        keystore.signed_prekey_by_id(header.signed_prekey_id).ok_or_else(|| {
            EngineError::HandshakeFailed {
                reason: format!("unknown signed prekey {}", header.signed_prekey_id),
            }
        })?;

    let dh1 = signed_prekey.pair.diffie_hellman(&their_identity);
    let dh2 = keystore.identity.dh.diffie_hellman(&their_ephemeral);
    let dh3 = signed_prekey.pair.diffie_hellman(&their_ephemeral);

    let dh4 = match header.one_time_prekey_id {
        Some(id) => {
            let one_time = keystore.published_one_time_prekey(id).ok_or_else(|| {
                EngineError::HandshakeFailed {
                    reason: format!("one-time prekey {id} unavailable"),
                }
            })?;
            Some(one_time.pair.diffie_hellman(&their_ephemeral))
        }
        None => None,
    };

    let (root_key, chain_seed) = derive_shared(&dh1, &dh2, &dh3, dh4.as_ref());

    let mut session = Session::from_x3dh(
        peer_id,
        header.identity_key,
        header.registration_id,
        root_key,
        DhKeyPair::generate(),
        ChainKey::new([0u8; 32]),
        None,
    );
    session.register_receiving_chain(their_ratchet_public, ChainKey::new(chain_seed));
    session.ratchet_sending_chain(their_ratchet_public)?;
    Ok(session)
}

/// Consume the one-time prekey named by an accepted header, if any.
///
/// Presence was already checked while building the responder session; the
/// removal enforces at-most-once use.
fn consume_one_time_prekey(keystore: &mut KeyStore, header: &PreKeyHeader) {
    if let Some(id) = header.one_time_prekey_id {
        keystore.take_one_time_prekey(id);
    }
}

/// Hash the concatenated DH outputs and split into root and chain keys.
fn derive_shared(
    dh1: &Zeroizing<[u8; 32]>,
    dh2: &Zeroizing<[u8; 32]>,
    dh3: &Zeroizing<[u8; 32]>,
    dh4: Option<&Zeroizing<[u8; 32]>>,
) -> ([u8; 32], [u8; 32]) {
    let mut concatenated = Zeroizing::new(Vec::with_capacity(128));
    concatenated.extend_from_slice(dh1.as_ref());
    concatenated.extend_from_slice(dh2.as_ref());
    concatenated.extend_from_slice(dh3.as_ref());
    if let Some(dh4) = dh4 {
        concatenated.extend_from_slice(dh4.as_ref());
    }

    let master = Zeroizing::new(hash::sha256(&concatenated));
    let root_key = kdf::expand_key(master.as_ref(), ROOT_LABEL);
    let chain_seed = kdf::expand_key(master.as_ref(), CHAIN_LABEL);
    (root_key, chain_seed)
}
