//! Duplicate-envelope detection.
//!
//! Tracks recently seen message ids per conversation in a bounded window.
//! A second delivery of the same id within the window is rejected as a
//! replay; ids older than the window are forgotten, trading unbounded
//! memory for a window the transport's own dedup should comfortably cover.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::errors::EngineError;

/// Ids remembered per conversation before the oldest are forgotten
pub const REPLAY_WINDOW: usize = 1024;

#[derive(Debug, Default)]
struct ConversationWindow {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

/// Bounded per-conversation record of delivered message ids
#[derive(Debug, Default)]
pub struct ReplayLedger {
    conversations: HashMap<String, ConversationWindow>,
}

impl ReplayLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `message_id` is already recorded for `conversation_id`.
    ///
    /// Used to reject a duplicate before doing any decryption work; the
    /// actual recording happens only after the message authenticates.
    #[must_use]
    pub fn contains(&self, conversation_id: &str, message_id: Uuid) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|window| window.seen.contains(&message_id))
    }

    /// Record `message_id` as delivered in `conversation_id`.
    ///
    /// # Errors
    ///
    /// Returns `ReplayDetected` if the id was already recorded within the
    /// window; the ledger is unchanged in that case.
    pub fn check_and_record(
        &mut self,
        conversation_id: &str,
        message_id: Uuid,
    ) -> Result<(), EngineError> {
        let window = self.conversations.entry(conversation_id.to_string()).or_default();

        if window.seen.contains(&message_id) {
            tracing::warn!(conversation = conversation_id, %message_id, "replayed envelope");
            return Err(EngineError::ReplayDetected { message_id });
        }

        window.seen.insert(message_id);
        window.order.push_back(message_id);
        if window.order.len() > REPLAY_WINDOW {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }
        Ok(())
    }

    /// Drop all recorded ids for a conversation.
    pub fn forget_conversation(&mut self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }
}
