//! In-memory registries of live sessions and groups.
//!
//! Each entry sits behind its own lock, so operations on different peers or
//! groups proceed concurrently while operations on the same entry serialize.
//! The registry map itself is only locked long enough to clone an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::group::GroupSession;
use crate::session::Session;

/// Live pairwise sessions keyed by peer id
pub type SessionRegistry = Registry<Session>;

/// Live group sessions keyed by group id
pub type GroupRegistry = Registry<GroupSession>;

/// Concurrent map of id to independently lockable entry
#[derive(Debug, Default)]
pub struct Registry<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Insert an entry, replacing any existing one under the same id.
    pub async fn insert(&self, id: impl Into<String>, value: T) -> Arc<Mutex<T>> {
        let entry = Arc::new(Mutex::new(value));
        self.entries.lock().await.insert(id.into(), Arc::clone(&entry));
        entry
    }

    /// Fetch the entry for `id`, if present.
    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<T>>> {
        self.entries.lock().await.get(id).cloned()
    }

    /// Remove and return the entry for `id`.
    ///
    /// Callers holding a clone of the `Arc` keep their handle; the registry
    /// simply stops serving it.
    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<T>>> {
        self.entries.lock().await.remove(id)
    }

    /// True if an entry exists for `id`.
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Snapshot of all registered ids.
    pub async fn ids(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_get_remove() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("bob", 7).await;

        let entry = registry.get("bob").await.unwrap();
        assert_eq!(*entry.lock().await, 7);

        registry.remove("bob").await.unwrap();
        assert!(registry.get("bob").await.is_none());
    }

    #[tokio::test]
    async fn entries_lock_independently() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("a", 1).await;
        registry.insert("b", 2).await;

        let a = registry.get("a").await.unwrap();
        let guard = a.lock().await;

        // Holding one entry's lock does not block access to another
        let b = registry.get("b").await.unwrap();
        assert_eq!(*b.lock().await, 2);
        drop(guard);
    }

    #[tokio::test]
    async fn removed_entry_survives_for_existing_handles() {
        let registry: Registry<String> = Registry::new();
        registry.insert("g", "state".to_string()).await;

        let handle = registry.get("g").await.unwrap();
        registry.remove("g").await;
        assert_eq!(*handle.lock().await, "state");
    }
}
