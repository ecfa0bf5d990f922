//! The message orchestrator: ties keys, sessions, groups, and capabilities
//! together.
//!
//! This is the host-facing surface. The host injects storage, directory, and
//! transport capabilities; the orchestrator owns the local [`KeyStore`], the
//! live session and group registries, replay tracking, and ephemeral expiry
//! timers. Outbound messages leave through the transport fully encrypted;
//! inbound bytes enter through the `receive_*` operations.
//!
//! # Message layering
//!
//! Pairwise text: content → ratchet AEAD.
//! Pairwise media: content → hybrid envelope (recipient's KEM key) →
//! ratchet AEAD.
//! Group messages: content → group AEAD under the epoch key. Group media
//! gets no hybrid wrap; the KEM envelope is addressed to a single
//! recipient, which a fan-out message has none of.
//!
//! # Invariants
//!
//! - A duplicate envelope id within a conversation's replay window is
//!   rejected before any decryption work.
//! - Session and group state is persisted after every mutating operation,
//!   so a restart resumes mid-conversation.

use std::sync::Arc;
use std::time::Duration;

use murmur_crypto::hybrid::{KemPublicKey, hybrid_decrypt, hybrid_encrypt};
use murmur_proto::{EncryptedMessage, MessageContent, RatchetMessage};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::directory::{Directory, Transport};
use crate::errors::EngineError;
use crate::expiry::ExpiryScheduler;
use crate::group::{GroupMember, GroupSession, Proposal, ProposalKind};
use crate::keys::{KeyPackage, KeyStore, PreKeyBundle};
use crate::ratchet;
use crate::registry::{GroupRegistry, SessionRegistry};
use crate::replay::ReplayLedger;
use crate::session::Session;
use crate::storage::Storage;

/// Host-facing messaging engine
pub struct Orchestrator {
    user_id: String,
    keystore: Mutex<KeyStore>,
    sessions: SessionRegistry,
    groups: GroupRegistry,
    storage: Arc<dyn Storage>,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    expiry: ExpiryScheduler,
    replay: Mutex<ReplayLedger>,
}

impl Orchestrator {
    /// Create an orchestrator around the local key store and the host's
    /// capabilities.
    pub fn new(
        user_id: impl Into<String>,
        keystore: KeyStore,
        storage: Arc<dyn Storage>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            keystore: Mutex::new(keystore),
            sessions: SessionRegistry::new(),
            groups: GroupRegistry::new(),
            storage,
            directory,
            transport,
            expiry: ExpiryScheduler::new(),
            replay: Mutex::new(ReplayLedger::new()),
        }
    }

    /// The local user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ---- pairwise messaging ----

    /// Encrypt and send a message to a peer, establishing a session first if
    /// none exists.
    ///
    /// Media payloads are hybrid-encrypted to the peer's KEM key before the
    /// ratchet layer. Returns the envelope that went out on the transport.
    ///
    /// # Errors
    ///
    /// - `Directory` if the peer's key material cannot be fetched
    /// - `HandshakeFailed` if their prekey bundle fails verification
    pub async fn send_message(
        &self,
        peer_id: &str,
        content: MessageContent,
    ) -> Result<EncryptedMessage, EngineError> {
        let handle = match self.session_handle(peer_id).await {
            Ok(handle) => handle,
            Err(EngineError::SessionNotFound { .. }) => self.establish_session(peer_id).await?,
            Err(err) => return Err(err),
        };

        let content_bytes = content.to_bytes()?;
        let message_type = content.body.message_type();
        let plaintext = if message_type.is_media() {
            let package = self.directory.fetch_key_package(peer_id).await?;
            let kem_public = KemPublicKey::from_bytes(&package.kem_public)?;
            hybrid_encrypt(&content_bytes, &kem_public)?
        } else {
            content_bytes.clone()
        };

        let mut session = handle.lock().await;
        let ratchet_message = session.encrypt(&plaintext)?;
        let envelope = EncryptedMessage {
            id: content.id,
            conversation_id: peer_id.to_string(),
            sender_id: self.user_id.clone(),
            ciphertext: ratchet_message.to_bytes()?,
            ephemeral_public_key: Some(session.ratchet_public_key()),
            timestamp: content.timestamp,
            message_type,
        };
        let session_bytes = session.to_bytes()?;
        drop(session);

        self.storage.set(&session_key(peer_id), session_bytes).await?;
        self.store_message(peer_id, &content, content_bytes).await?;
        self.transport.send(peer_id, envelope.to_bytes()?).await?;

        tracing::debug!(peer = peer_id, id = %envelope.id, "pairwise message sent");
        Ok(envelope)
    }

    /// Decrypt a received pairwise envelope.
    ///
    /// Accepts the session from the bootstrap header if this is the peer's
    /// first message; nothing is registered and no prekey is consumed until
    /// that bootstrap ciphertext authenticates, so a forged first message
    /// cannot occupy the peer's session slot.
    ///
    /// # Errors
    ///
    /// - `ReplayDetected` for a duplicate envelope id
    /// - `SessionNotFound` if no session exists and the message carries no
    ///   bootstrap header
    /// - `DecryptionFailure` on any authentication failure
    pub async fn receive_message(
        &self,
        envelope: &EncryptedMessage,
    ) -> Result<MessageContent, EngineError> {
        let peer_id = envelope.sender_id.as_str();
        if self.replay.lock().await.contains(peer_id, envelope.id) {
            return Err(EngineError::ReplayDetected { message_id: envelope.id });
        }

        let ratchet_message = RatchetMessage::from_bytes(&envelope.ciphertext)?;
        let their_ratchet_public =
            envelope.ephemeral_public_key.ok_or_else(|| EngineError::HandshakeFailed {
                reason: "pairwise envelope missing ratchet public key".to_string(),
            })?;

        let (plaintext, session_bytes) = match self.session_handle(peer_id).await {
            Ok(handle) => {
                let mut session = handle.lock().await;
                let plaintext = session.decrypt(their_ratchet_public, &ratchet_message)?;
                (plaintext, session.to_bytes()?)
            }
            Err(EngineError::SessionNotFound { .. }) => {
                let mut keystore = self.keystore.lock().await;
                let (session, plaintext) = ratchet::accept_first_message(
                    &mut keystore,
                    peer_id,
                    their_ratchet_public,
                    &ratchet_message,
                )?;
                drop(keystore);
                let session_bytes = session.to_bytes()?;
                self.sessions.insert(peer_id, session).await;
                (plaintext, session_bytes)
            }
            Err(err) => return Err(err),
        };

        let content_bytes = if envelope.message_type.is_media() {
            let keystore = self.keystore.lock().await;
            hybrid_decrypt(&plaintext, &keystore.kem.secret)?
        } else {
            plaintext
        };
        let content = MessageContent::from_bytes(&content_bytes)?;

        self.replay.lock().await.check_and_record(peer_id, envelope.id)?;
        self.storage.set(&session_key(peer_id), session_bytes).await?;
        self.store_message(peer_id, &content, content_bytes).await?;

        tracing::debug!(peer = peer_id, id = %envelope.id, "pairwise message received");
        Ok(content)
    }

    /// Securely close the session with a peer: wipe key material, delete
    /// persisted state, forget replay history.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if persisted state cannot be deleted.
    pub async fn close_session(&self, peer_id: &str) -> Result<(), EngineError> {
        if let Some(handle) = self.sessions.remove(peer_id).await {
            handle.lock().await.close();
        }
        self.storage.delete(&session_key(peer_id)).await?;
        self.replay.lock().await.forget_conversation(peer_id);
        Ok(())
    }

    // ---- group messaging ----

    /// Create a group with the local user as its first member.
    ///
    /// # Errors
    ///
    /// Returns `Directory` if the local credential cannot be fetched.
    pub async fn create_group(&self, group_id: &str) -> Result<(), EngineError> {
        let package = self.keystore.lock().await.key_package(&self.user_id);
        let credential = self.directory.fetch_credential(&self.user_id).await?;
        let creator = GroupMember {
            user_id: self.user_id.clone(),
            key_package: package,
            credential,
            added_by: self.user_id.clone(),
            added_at: now_millis(),
        };

        let group = GroupSession::create(group_id, creator);
        self.storage.set(&group_storage_key(group_id), group.to_bytes()?).await?;
        self.groups.insert(group_id, group).await;
        Ok(())
    }

    /// Add a member to a group and deliver their welcome message.
    ///
    /// Returns the applied proposal; the host distributes it to existing
    /// members, who feed it into
    /// [`apply_group_proposal`](Self::apply_group_proposal) to advance
    /// their epoch in step.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound` if the group does not exist locally
    /// - `ProposalInvalid` if the target is already a member
    /// - `Directory` if the target's key material cannot be fetched
    pub async fn add_group_member(
        &self,
        group_id: &str,
        target: &str,
    ) -> Result<Proposal, EngineError> {
        let package = self.directory.fetch_key_package(target).await?;
        let credential = self.directory.fetch_credential(target).await?;

        let proposal = Proposal {
            id: Uuid::new_v4(),
            kind: ProposalKind::Add {
                target: target.to_string(),
                key_package: package,
                credential,
            },
            proposer: self.user_id.clone(),
            timestamp: now_millis(),
        };

        let handle = self.group_handle(group_id).await?;
        let mut group = handle.lock().await;
        let welcome = group.process_proposal(proposal.clone())?;
        let group_bytes = group.to_bytes()?;
        drop(group);

        self.storage.set(&group_storage_key(group_id), group_bytes).await?;
        if let Some(welcome) = welcome {
            self.transport.send(target, welcome.envelope).await?;
        }
        Ok(proposal)
    }

    /// Remove a member from a group, fencing them out of future epochs.
    ///
    /// Returns the applied proposal for distribution to remaining members.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound` if the group does not exist locally
    /// - `ProposalInvalid` if the target is not a member
    pub async fn remove_group_member(
        &self,
        group_id: &str,
        target: &str,
    ) -> Result<Proposal, EngineError> {
        let proposal = Proposal {
            id: Uuid::new_v4(),
            kind: ProposalKind::Remove { target: target.to_string() },
            proposer: self.user_id.clone(),
            timestamp: now_millis(),
        };

        let handle = self.group_handle(group_id).await?;
        let mut group = handle.lock().await;
        group.process_proposal(proposal.clone())?;
        let group_bytes = group.to_bytes()?;
        drop(group);

        self.storage.set(&group_storage_key(group_id), group_bytes).await?;
        Ok(proposal)
    }

    /// Apply a membership proposal received from another member.
    ///
    /// Advances the local copy of the group to the proposal's epoch; any
    /// welcome produced is discarded, since the proposer already delivered
    /// it.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound` if the group does not exist locally
    /// - `ProposalInvalid` if the proposal does not validate against the
    ///   local member list
    pub async fn apply_group_proposal(
        &self,
        group_id: &str,
        proposal: Proposal,
    ) -> Result<(), EngineError> {
        let handle = self.group_handle(group_id).await?;
        let mut group = handle.lock().await;
        group.process_proposal(proposal)?;
        let group_bytes = group.to_bytes()?;
        drop(group);

        self.storage.set(&group_storage_key(group_id), group_bytes).await?;
        Ok(())
    }

    /// Join a group from a received welcome envelope. Returns the group id.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailure` if the welcome is not addressed to us
    /// - `ProposalInvalid` if the welcome's membership commitment is broken
    pub async fn join_group(&self, welcome_envelope: &[u8]) -> Result<String, EngineError> {
        let group = {
            let keystore = self.keystore.lock().await;
            GroupSession::from_welcome(welcome_envelope, &keystore.kem.secret)?
        };
        let group_id = group.group_id.clone();

        self.storage.set(&group_storage_key(&group_id), group.to_bytes()?).await?;
        self.groups.insert(group_id.clone(), group).await;
        tracing::debug!(group = %group_id, "joined group from welcome");
        Ok(group_id)
    }

    /// Encrypt and send a message to a group under the current epoch key.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` if the group does not exist locally.
    pub async fn send_group_message(
        &self,
        group_id: &str,
        content: MessageContent,
    ) -> Result<EncryptedMessage, EngineError> {
        let content_bytes = content.to_bytes()?;

        let handle = self.group_handle(group_id).await?;
        let group = handle.lock().await;
        let ciphertext = group.encrypt(self.user_id.clone(), content.timestamp, &content_bytes)?;
        drop(group);

        let envelope = EncryptedMessage {
            id: content.id,
            conversation_id: group_id.to_string(),
            sender_id: self.user_id.clone(),
            ciphertext,
            ephemeral_public_key: None,
            timestamp: content.timestamp,
            message_type: content.body.message_type(),
        };

        self.store_message(group_id, &content, content_bytes).await?;
        self.transport.send(group_id, envelope.to_bytes()?).await?;

        tracing::debug!(group = group_id, id = %envelope.id, "group message sent");
        Ok(envelope)
    }

    /// Decrypt a received group envelope.
    ///
    /// # Errors
    ///
    /// - `ReplayDetected` for a duplicate envelope id
    /// - `GroupNotFound` if the group does not exist locally
    /// - `EpochMismatch` if the message was encrypted under another epoch
    pub async fn receive_group_message(
        &self,
        envelope: &EncryptedMessage,
    ) -> Result<MessageContent, EngineError> {
        let group_id = envelope.conversation_id.as_str();
        if self.replay.lock().await.contains(group_id, envelope.id) {
            return Err(EngineError::ReplayDetected { message_id: envelope.id });
        }

        let handle = self.group_handle(group_id).await?;
        let group = handle.lock().await;
        let (content_bytes, aad) = group.decrypt(&envelope.ciphertext)?;
        drop(group);

        if aad.sender != envelope.sender_id {
            tracing::warn!(
                group = group_id,
                envelope_sender = %envelope.sender_id,
                aad_sender = %aad.sender,
                "envelope sender does not match authenticated sender"
            );
        }

        let content = MessageContent::from_bytes(&content_bytes)?;
        self.replay.lock().await.check_and_record(group_id, envelope.id)?;
        self.store_message(group_id, &content, content_bytes).await?;

        tracing::debug!(group = group_id, id = %envelope.id, "group message received");
        Ok(content)
    }

    /// Leave a group locally: drop its state and replay history.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if persisted state cannot be deleted.
    pub async fn leave_group(&self, group_id: &str) -> Result<(), EngineError> {
        self.groups.remove(group_id).await;
        self.storage.delete(&group_storage_key(group_id)).await?;
        self.replay.lock().await.forget_conversation(group_id);
        Ok(())
    }

    // ---- key material maintenance ----

    /// Produce a prekey bundle for publication, consuming a one-time prekey.
    ///
    /// # Errors
    ///
    /// Returns `KeyExhausted` when the one-time pool is empty.
    pub async fn prekey_bundle(&self) -> Result<PreKeyBundle, EngineError> {
        self.keystore.lock().await.generate_prekey_bundle()
    }

    /// The local key package with its post-quantum attestation packet.
    ///
    /// # Errors
    ///
    /// Returns `Wire` if the package fails to serialize.
    pub async fn attested_key_package(&self) -> Result<(KeyPackage, Vec<u8>), EngineError> {
        let keystore = self.keystore.lock().await;
        let package = keystore.key_package(&self.user_id);
        let packet = keystore.attest(&package.to_bytes()?);
        Ok((package, packet))
    }

    /// Rotate the signed prekey and top up the one-time pool if it has
    /// dropped below its low-water mark.
    pub async fn maintain_keys(&self) {
        let mut keystore = self.keystore.lock().await;
        keystore.rotate_signed_prekey();
        if keystore.needs_replenishment() {
            keystore.replenish_one_time_prekeys();
        }
    }

    // ---- message history ----

    /// Fetch a locally stored message, if it has not expired or been deleted.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend fails, `Wire` on a corrupt record.
    pub async fn stored_message(
        &self,
        conversation_id: &str,
        message_id: Uuid,
    ) -> Result<Option<MessageContent>, EngineError> {
        let Some(bytes) = self.storage.get(&message_storage_key(conversation_id, message_id)).await?
        else {
            return Ok(None);
        };
        Ok(Some(MessageContent::from_bytes(&bytes)?))
    }

    /// Delete a stored message immediately and cancel any pending expiry.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend fails.
    pub async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: Uuid,
    ) -> Result<(), EngineError> {
        self.expiry.cancel(message_id).await;
        self.storage.delete(&message_storage_key(conversation_id, message_id)).await?;
        Ok(())
    }

    /// Cancel all pending expiry timers. Call before dropping the runtime.
    pub async fn shutdown(&self) {
        self.expiry.shutdown().await;
    }

    // ---- internals ----

    /// Live session for `peer_id`, restoring from storage if needed.
    async fn session_handle(
        &self,
        peer_id: &str,
    ) -> Result<Arc<Mutex<Session>>, EngineError> {
        if let Some(handle) = self.sessions.get(peer_id).await {
            return Ok(handle);
        }
        if let Some(bytes) = self.storage.get(&session_key(peer_id)).await? {
            let session = Session::from_bytes(&bytes)?;
            tracing::debug!(peer = peer_id, "session restored from storage");
            return Ok(self.sessions.insert(peer_id, session).await);
        }
        Err(EngineError::SessionNotFound { peer_id: peer_id.to_string() })
    }

    /// Live group for `group_id`, restoring from storage if needed.
    async fn group_handle(
        &self,
        group_id: &str,
    ) -> Result<Arc<Mutex<GroupSession>>, EngineError> {
        if let Some(handle) = self.groups.get(group_id).await {
            return Ok(handle);
        }
        if let Some(bytes) = self.storage.get(&group_storage_key(group_id)).await? {
            let group = GroupSession::from_bytes(&bytes)?;
            tracing::debug!(group = group_id, "group restored from storage");
            return Ok(self.groups.insert(group_id, group).await);
        }
        Err(EngineError::GroupNotFound { group_id: group_id.to_string() })
    }

    /// Initiate a session from the peer's published prekey bundle.
    async fn establish_session(
        &self,
        peer_id: &str,
    ) -> Result<Arc<Mutex<Session>>, EngineError> {
        let bundle = self.directory.fetch_prekey_bundle(peer_id).await?;
        let keystore = self.keystore.lock().await;
        let session = ratchet::initialize_session(&keystore, peer_id, &bundle)?;
        drop(keystore);
        tracing::debug!(peer = peer_id, "session initiated from prekey bundle");
        Ok(self.sessions.insert(peer_id, session).await)
    }

    /// Persist a message locally and arm its expiry timer if ephemeral.
    async fn store_message(
        &self,
        conversation_id: &str,
        content: &MessageContent,
        content_bytes: Vec<u8>,
    ) -> Result<(), EngineError> {
        let key = message_storage_key(conversation_id, content.id);
        self.storage.set(&key, content_bytes).await?;

        if let Some(ttl_secs) = content.expires_in_secs {
            let storage = Arc::clone(&self.storage);
            self.expiry
                .schedule(content.id, Duration::from_secs(ttl_secs), async move {
                    if let Err(err) = storage.delete(&key).await {
                        tracing::warn!(%err, "failed to delete expired message");
                    }
                })
                .await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("user_id", &self.user_id).finish_non_exhaustive()
    }
}

fn session_key(peer_id: &str) -> String {
    format!("session:{peer_id}")
}

fn group_storage_key(group_id: &str) -> String {
    format!("group:{group_id}")
}

fn message_storage_key(conversation_id: &str, message_id: Uuid) -> String {
    format!("message:{conversation_id}:{message_id}")
}

fn now_millis() -> u64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    elapsed.as_millis() as u64
}
