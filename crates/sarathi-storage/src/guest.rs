//! Bounded, device-local chat history for unauthenticated users.
//!
//! The history is one JSON array under a single key. Only the newest
//! `max_messages` entries are kept, oldest discarded first.

use std::sync::Arc;

use sarathi_core::config::GuestConfig;
use sarathi_core::error::Result;
use sarathi_core::types::{ChatMessage, PersistedMessage};

use crate::kv::KeyValueStore;

/// Guest message history over any [`KeyValueStore`].
#[derive(Clone)]
pub struct GuestMessageStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_messages: usize,
}

impl GuestMessageStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &GuestConfig) -> Self {
        Self {
            store,
            key: config.storage_key.clone(),
            max_messages: config.max_messages,
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Replace the stored history with the finished messages of `messages`.
    ///
    /// Messages still streaming are skipped.
    pub fn save(&self, messages: &[ChatMessage]) -> Result<()> {
        let persisted: Vec<PersistedMessage> = messages
            .iter()
            .filter(|m| !m.is_streaming)
            .map(PersistedMessage::from)
            .collect();
        self.save_persisted(persisted)
    }

    /// Replace the stored history, keeping only the newest entries.
    pub fn save_persisted(&self, mut persisted: Vec<PersistedMessage>) -> Result<()> {
        if persisted.len() > self.max_messages {
            let excess = persisted.len() - self.max_messages;
            persisted.drain(..excess);
        }
        let json = serde_json::to_string(&persisted)?;
        self.store.set(&self.key, &json)?;
        tracing::debug!(count = persisted.len(), "Guest history saved");
        Ok(())
    }

    /// Read the stored history in display order.
    ///
    /// A payload that no longer parses is logged and treated as empty.
    pub fn load(&self) -> Result<Vec<PersistedMessage>> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<PersistedMessage>>(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable guest history");
                Ok(Vec::new())
            }
        }
    }

    /// Stored history mapped back to chat messages.
    pub fn load_messages(&self) -> Result<Vec<ChatMessage>> {
        Ok(self
            .load()?
            .into_iter()
            .map(ChatMessage::from_persisted)
            .collect())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.load()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)?;
        tracing::debug!("Guest history cleared");
        Ok(())
    }
}

impl std::fmt::Debug for GuestMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMessageStore")
            .field("key", &self.key)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::sqlite::SqliteStore;
    use chrono::{Duration, Utc};
    use sarathi_core::types::Role;

    fn store_with_cap(cap: usize) -> (Arc<MemoryStore>, GuestMessageStore) {
        let backing = Arc::new(MemoryStore::new());
        let config = GuestConfig {
            max_messages: cap,
            ..GuestConfig::default()
        };
        let guest = GuestMessageStore::new(backing.clone(), &config);
        (backing, guest)
    }

    fn numbered(n: usize) -> Vec<ChatMessage> {
        let base = Utc::now();
        (0..n)
            .map(|i| {
                let mut msg = if i % 2 == 0 {
                    ChatMessage::user(format!("question {}", i))
                } else {
                    ChatMessage::assistant(format!("answer {}", i))
                };
                msg.created_at = base + Duration::seconds(i as i64);
                msg
            })
            .collect()
    }

    #[test]
    fn test_load_empty_store() {
        let (_, guest) = store_with_cap(50);
        assert!(guest.load().unwrap().is_empty());
        assert!(guest.is_empty().unwrap());
    }

    #[test]
    fn test_round_trip_preserves_order_roles_and_content() {
        let (_, guest) = store_with_cap(50);
        let messages = numbered(7);
        guest.save(&messages).unwrap();

        let loaded = guest.load().unwrap();
        assert_eq!(loaded.len(), 7);
        for (orig, back) in messages.iter().zip(loaded.iter()) {
            assert_eq!(orig.id, back.id);
            assert_eq!(orig.role, back.role);
            assert_eq!(orig.content, back.content);
        }
        assert!(loaded.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_cap_keeps_most_recent_oldest_first() {
        let (_, guest) = store_with_cap(5);
        let messages = numbered(12);
        guest.save(&messages).unwrap();

        let loaded = guest.load().unwrap();
        assert_eq!(loaded.len(), 5);
        let expected: Vec<&str> = messages[7..].iter().map(|m| m.id.as_str()).collect();
        let got: Vec<&str> = loaded.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_cap_is_idempotent_across_saves() {
        let (_, guest) = store_with_cap(4);
        let messages = numbered(9);
        guest.save(&messages).unwrap();
        let first = guest.load().unwrap();

        guest.save_persisted(first.clone()).unwrap();
        assert_eq!(guest.load().unwrap(), first);
    }

    #[test]
    fn test_streaming_messages_not_persisted() {
        let (_, guest) = store_with_cap(50);
        let messages = vec![ChatMessage::user("hi"), ChatMessage::placeholder()];
        guest.save(&messages).unwrap();

        let loaded = guest.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].role, Role::User);
    }

    #[test]
    fn test_clear_removes_history() {
        let (backing, guest) = store_with_cap(50);
        guest.save(&numbered(3)).unwrap();
        assert!(!backing.is_empty());

        guest.clear().unwrap();
        assert!(guest.load().unwrap().is_empty());
        assert!(backing.is_empty());
    }

    #[test]
    fn test_corrupt_payload_treated_as_empty() {
        let (backing, guest) = store_with_cap(50);
        backing.set("guest_chat_messages", "{not an array").unwrap();
        assert!(guest.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_messages_maps_back() {
        let (_, guest) = store_with_cap(50);
        guest.save(&numbered(2)).unwrap();
        let msgs = guest.load_messages().unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| !m.is_streaming));
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[test]
    fn test_works_over_sqlite() {
        let backing = Arc::new(SqliteStore::in_memory().unwrap());
        let guest = GuestMessageStore::new(backing, &GuestConfig::default());
        guest.save(&numbered(3)).unwrap();
        assert_eq!(guest.load().unwrap().len(), 3);
    }
}
