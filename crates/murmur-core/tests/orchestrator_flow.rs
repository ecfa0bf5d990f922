//! End-to-end orchestrator scenarios over in-memory capabilities.
//!
//! Two or three orchestrators share a fake directory; envelopes travel
//! between them the way a host would shuttle them, by handing the receive
//! operations what the transport captured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murmur_core::directory::{Directory, DirectoryError, Transport};
use murmur_core::errors::EngineError;
use murmur_core::keys::{KeyPackage, KeyStore, PreKeyBundle};
use murmur_core::orchestrator::Orchestrator;
use murmur_core::storage::MemoryStorage;
use murmur_proto::{EncryptedMessage, MessageContent, MessageType, RatchetMessage};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct FakeDirectory {
    bundles: Mutex<HashMap<String, Vec<PreKeyBundle>>>,
    packages: Mutex<HashMap<String, KeyPackage>>,
}

impl FakeDirectory {
    async fn publish_bundle(&self, user_id: &str, bundle: PreKeyBundle) {
        self.bundles.lock().await.entry(user_id.to_string()).or_default().push(bundle);
    }

    async fn publish_package(&self, user_id: &str, package: KeyPackage) {
        self.packages.lock().await.insert(user_id.to_string(), package);
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn fetch_prekey_bundle(&self, user_id: &str) -> Result<PreKeyBundle, DirectoryError> {
        self.bundles
            .lock()
            .await
            .get_mut(user_id)
            .and_then(Vec::pop)
            .ok_or_else(|| DirectoryError::UserNotFound { user_id: user_id.to_string() })
    }

    async fn fetch_key_package(&self, user_id: &str) -> Result<KeyPackage, DirectoryError> {
        self.packages
            .lock()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound { user_id: user_id.to_string() })
    }

    async fn fetch_credential(&self, user_id: &str) -> Result<Vec<u8>, DirectoryError> {
        Ok(format!("credential:{user_id}").into_bytes())
    }
}

#[derive(Default)]
struct FakeTransport {
    outbox: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeTransport {
    async fn drain(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.outbox.lock().await)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<(), DirectoryError> {
        self.outbox.lock().await.push((destination.to_string(), payload));
        Ok(())
    }
}

struct Peer {
    engine: Orchestrator,
    transport: Arc<FakeTransport>,
    storage: MemoryStorage,
}

/// Spin up an orchestrator and publish its key material to the directory.
async fn peer(user_id: &str, registration_id: u32, directory: &Arc<FakeDirectory>) -> Peer {
    let transport = Arc::new(FakeTransport::default());
    let storage = MemoryStorage::new();
    let engine = Orchestrator::new(
        user_id,
        KeyStore::new(registration_id, 1),
        Arc::new(storage.clone()),
        Arc::clone(directory) as Arc<dyn Directory>,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let (package, _attestation) = engine.attested_key_package().await.unwrap();
    directory.publish_package(user_id, package).await;
    for _ in 0..4 {
        directory.publish_bundle(user_id, engine.prekey_bundle().await.unwrap()).await;
    }

    Peer { engine, transport, storage }
}

#[tokio::test]
async fn text_conversation_round_trip() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let sent = MessageContent::text("hey bob", 1_700_000_000_000);
    let envelope = alice.engine.send_message("bob", sent.clone()).await.unwrap();
    assert_eq!(envelope.message_type, MessageType::Text);

    // The transport saw the same envelope the call returned
    let outbox = alice.transport.drain().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].0, "bob");
    assert_eq!(EncryptedMessage::from_bytes(&outbox[0].1).unwrap(), envelope);

    let received = bob.engine.receive_message(&envelope).await.unwrap();
    assert_eq!(received, sent);

    // Reply flows back over the now-established session
    let reply = MessageContent::text("hey alice", 1_700_000_001_000);
    let reply_envelope = bob.engine.send_message("alice", reply.clone()).await.unwrap();
    assert_eq!(alice.engine.receive_message(&reply_envelope).await.unwrap(), reply);
}

#[tokio::test]
async fn media_travels_under_hybrid_wrap() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let image = MessageContent::media(MessageType::Image, vec![0xAB; 512], 1);
    let envelope = alice.engine.send_message("bob", image.clone()).await.unwrap();
    assert_eq!(envelope.message_type, MessageType::Image);

    // The Kyber encapsulation alone is over a kilobyte of overhead
    assert!(envelope.ciphertext.len() > 512 + 1024);

    let received = bob.engine.receive_message(&envelope).await.unwrap();
    assert_eq!(received, image);
}

#[tokio::test]
async fn duplicate_envelope_is_rejected() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let envelope =
        alice.engine.send_message("bob", MessageContent::text("once", 1)).await.unwrap();
    bob.engine.receive_message(&envelope).await.unwrap();

    let replay = bob.engine.receive_message(&envelope).await;
    assert!(matches!(
        replay,
        Err(EngineError::ReplayDetected { message_id }) if message_id == envelope.id
    ));
}

#[tokio::test]
async fn forged_bootstrap_does_not_block_the_genuine_one() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let sent = MessageContent::text("first contact", 1);
    let envelope = alice.engine.send_message("bob", sent.clone()).await.unwrap();

    // An attacker re-wraps alice's bootstrap with a flipped ciphertext byte
    // and a fresh envelope id
    let mut inner = RatchetMessage::from_bytes(&envelope.ciphertext).unwrap();
    let last = inner.ciphertext.len() - 1;
    inner.ciphertext[last] ^= 0x01;
    let forged = EncryptedMessage {
        id: Uuid::new_v4(),
        ciphertext: inner.to_bytes().unwrap(),
        ..envelope.clone()
    };

    assert!(matches!(
        bob.engine.receive_message(&forged).await,
        Err(EngineError::DecryptionFailure)
    ));

    // The forgery registered nothing: the genuine bootstrap still lands and
    // the session converses both ways
    assert_eq!(bob.engine.receive_message(&envelope).await.unwrap(), sent);

    let reply = MessageContent::text("still here", 2);
    let reply_envelope = bob.engine.send_message("alice", reply.clone()).await.unwrap();
    assert_eq!(alice.engine.receive_message(&reply_envelope).await.unwrap(), reply);
}

#[tokio::test]
async fn closed_session_rejects_further_messages() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    // Full round trip so alice's messages stop carrying the bootstrap header
    let first = alice.engine.send_message("bob", MessageContent::text("hi", 1)).await.unwrap();
    bob.engine.receive_message(&first).await.unwrap();
    let reply = bob.engine.send_message("alice", MessageContent::text("hi", 2)).await.unwrap();
    alice.engine.receive_message(&reply).await.unwrap();

    bob.engine.close_session("alice").await.unwrap();

    let late = alice.engine.send_message("bob", MessageContent::text("gone", 3)).await.unwrap();
    assert!(matches!(
        bob.engine.receive_message(&late).await,
        Err(EngineError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn session_survives_restart_via_storage() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let first = alice.engine.send_message("bob", MessageContent::text("one", 1)).await.unwrap();
    bob.engine.receive_message(&first).await.unwrap();

    // A fresh engine over the same storage resumes the session
    let restarted = Orchestrator::new(
        "bob",
        KeyStore::new(2, 2),
        Arc::new(bob.storage.clone()),
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::clone(&bob.transport) as Arc<dyn Transport>,
    );

    let two = MessageContent::text("two", 2);
    let second = alice.engine.send_message("bob", two.clone()).await.unwrap();
    assert_eq!(restarted.receive_message(&second).await.unwrap(), two);
}

#[tokio::test(start_paused = true)]
async fn ephemeral_message_expires_locally() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let burn = MessageContent::text("burn after reading", 1).with_ttl(30);
    let envelope = alice.engine.send_message("bob", burn.clone()).await.unwrap();
    bob.engine.receive_message(&envelope).await.unwrap();

    assert!(bob.engine.stored_message("alice", burn.id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_secs(35)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(bob.engine.stored_message("alice", burn.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_delete_cancels_expiry() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    let burn = MessageContent::text("gone early", 1).with_ttl(60);
    let envelope = alice.engine.send_message("bob", burn.clone()).await.unwrap();
    bob.engine.receive_message(&envelope).await.unwrap();

    bob.engine.delete_message("alice", burn.id).await.unwrap();
    assert!(bob.engine.stored_message("alice", burn.id).await.unwrap().is_none());

    // The cancelled timer does not fire later
    tokio::time::sleep(Duration::from_secs(120)).await;
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn prekey_pool_exhaustion_and_recovery() {
    let directory = Arc::new(FakeDirectory::default());
    let solo = peer("solo", 9, &directory).await;

    // Drain the remaining pool (4 bundles already published in setup)
    let mut drained = 0;
    loop {
        match solo.engine.prekey_bundle().await {
            Ok(_) => drained += 1,
            Err(EngineError::KeyExhausted) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(drained, 96);

    // Maintenance rotates and refills; bundles flow again
    solo.engine.maintain_keys().await;
    solo.engine.prekey_bundle().await.unwrap();
}

#[tokio::test]
async fn group_lifecycle_with_welcome_and_proposals() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;
    let carol = peer("carol", 3, &directory).await;

    alice.engine.create_group("friends").await.unwrap();
    alice.engine.add_group_member("friends", "bob").await.unwrap();

    // The welcome went out addressed to bob
    let outbox = alice.transport.drain().await;
    let (destination, welcome) = &outbox[0];
    assert_eq!(destination, "bob");
    assert_eq!(bob.engine.join_group(welcome).await.unwrap(), "friends");

    // Bob applies the carol addition to stay in epoch step
    let proposal = alice.engine.add_group_member("friends", "carol").await.unwrap();
    bob.engine.apply_group_proposal("friends", proposal).await.unwrap();

    let outbox = alice.transport.drain().await;
    let (_, carol_welcome) = &outbox[0];
    carol.engine.join_group(carol_welcome).await.unwrap();

    let content = MessageContent::text("hello everyone", 5);
    let envelope = alice.engine.send_group_message("friends", content.clone()).await.unwrap();
    assert!(envelope.ephemeral_public_key.is_none());

    assert_eq!(bob.engine.receive_group_message(&envelope).await.unwrap(), content);
    assert_eq!(carol.engine.receive_group_message(&envelope).await.unwrap(), content);
}

#[tokio::test]
async fn member_behind_an_epoch_is_fenced() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    alice.engine.create_group("team").await.unwrap();
    alice.engine.add_group_member("team", "bob").await.unwrap();
    let outbox = alice.transport.drain().await;
    let (_, welcome) = &outbox[0];
    bob.engine.join_group(welcome).await.unwrap();

    // Bob never hears about the carol addition
    let _carol = peer("carol", 3, &directory).await;
    alice.engine.add_group_member("team", "carol").await.unwrap();

    let envelope = alice
        .engine
        .send_group_message("team", MessageContent::text("new epoch", 9))
        .await
        .unwrap();
    assert!(matches!(
        bob.engine.receive_group_message(&envelope).await,
        Err(EngineError::EpochMismatch { .. })
    ));
}

#[tokio::test]
async fn removed_member_cannot_read_new_epochs() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    alice.engine.create_group("team").await.unwrap();
    alice.engine.add_group_member("team", "bob").await.unwrap();
    let outbox = alice.transport.drain().await;
    let (_, welcome) = &outbox[0];
    bob.engine.join_group(welcome).await.unwrap();

    // Bob is removed; his copy stays at the old epoch
    alice.engine.remove_group_member("team", "bob").await.unwrap();

    let envelope = alice
        .engine
        .send_group_message("team", MessageContent::text("without bob", 10))
        .await
        .unwrap();
    assert!(matches!(
        bob.engine.receive_group_message(&envelope).await,
        Err(EngineError::EpochMismatch { .. })
    ));
}

#[tokio::test]
async fn welcome_is_unreadable_by_non_recipients() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;
    let eve = peer("eve", 4, &directory).await;
    let _ = &bob;

    alice.engine.create_group("private").await.unwrap();
    alice.engine.add_group_member("private", "bob").await.unwrap();
    let outbox = alice.transport.drain().await;
    let (_, welcome) = &outbox[0];

    assert!(eve.engine.join_group(welcome).await.is_err());
}

#[tokio::test]
async fn group_replay_rejected() {
    let directory = Arc::new(FakeDirectory::default());
    let alice = peer("alice", 1, &directory).await;
    let bob = peer("bob", 2, &directory).await;

    alice.engine.create_group("g").await.unwrap();
    alice.engine.add_group_member("g", "bob").await.unwrap();
    let outbox = alice.transport.drain().await;
    let (_, welcome) = &outbox[0];
    bob.engine.join_group(welcome).await.unwrap();

    let envelope = alice
        .engine
        .send_group_message("g", MessageContent::text("only once", 7))
        .await
        .unwrap();
    bob.engine.receive_group_message(&envelope).await.unwrap();
    assert!(matches!(
        bob.engine.receive_group_message(&envelope).await,
        Err(EngineError::ReplayDetected { .. })
    ));
}
