//! Timers for ephemeral message expiry.
//!
//! Each ephemeral message gets one timer; when it fires, the caller-supplied
//! cleanup future runs (deleting the plaintext wherever the host keeps it).
//! Cancellation is idempotent and tolerates messages that already expired or
//! were never scheduled, so user-initiated deletes and timer fires can race
//! freely.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Fire-and-forget expiry timers keyed by message id
#[derive(Debug, Clone, Default)]
pub struct ExpiryScheduler {
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl ExpiryScheduler {
    /// Create a scheduler with no timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` to run after `ttl`.
    ///
    /// Scheduling the same message id again replaces the previous timer.
    /// The timer removes itself from the map when it fires.
    pub async fn schedule<F>(&self, message_id: Uuid, ttl: Duration, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timers = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            on_expire.await;
            timers.lock().await.remove(&message_id);
        });

        if let Some(replaced) = self.timers.lock().await.insert(message_id, handle) {
            replaced.abort();
        }
        tracing::trace!(%message_id, ttl_secs = ttl.as_secs(), "expiry scheduled");
    }

    /// Cancel the timer for `message_id`, if one is still pending.
    ///
    /// Safe to call for messages that already expired or were never
    /// ephemeral.
    pub async fn cancel(&self, message_id: Uuid) {
        if let Some(handle) = self.timers.lock().await.remove(&message_id) {
            handle.abort();
            tracing::trace!(%message_id, "expiry cancelled");
        }
    }

    /// Number of timers currently pending.
    pub async fn pending(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Abort every pending timer without running cleanups.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
