//! Guest history migration on sign-in.
//!
//! The guest store is cleared only after the conversation was created and
//! every message replayed, so a failure leaves it intact for the next try.

use sarathi_core::error::Result;
use sarathi_core::types::{
    derive_title, ChatMessage, ConversationLink, NewMessage, Role, FALLBACK_TITLE,
};

use crate::controller::ChatController;
use crate::session::SessionUpdate;

/// Result of a migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing stored for the guest.
    Skipped,
    Migrated {
        conversation_id: String,
        messages: usize,
    },
}

impl ChatController {
    /// Move the guest history into a new conversation owned by `user_id`.
    pub async fn migrate_guest_history(&self, user_id: &str) -> Result<MigrationOutcome> {
        let inner = &self.inner;
        let guest = inner.guest_store.load()?;
        if guest.is_empty() {
            tracing::debug!("No guest history to migrate");
            return Ok(MigrationOutcome::Skipped);
        }

        let title = guest
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| derive_title(&m.content, inner.chat.title_max_chars))
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let (language, view) = {
            let state = inner.lock();
            (state.language.clone(), state.view)
        };

        let conversations = &inner.services.conversations;
        let created = conversations
            .create_conversation(user_id, &title, &language)
            .await?;
        for message in &guest {
            conversations
                .append_message(&created.id, NewMessage::new(message.role, message.content.clone()))
                .await?;
        }

        let count = guest.len();
        let messages: Vec<ChatMessage> = guest.into_iter().map(ChatMessage::from_persisted).collect();
        let replaced = {
            let mut state = inner.lock();
            // Leave the session alone if the user moved on meanwhile.
            if state.view == view && state.active.is_none() {
                state.messages = messages;
                state.link = ConversationLink::server(created.id.clone());
                state.view += 1;
                state.epoch += 1;
                state.creating = None;
                true
            } else {
                false
            }
        };
        inner.guest_store.clear()?;

        tracing::info!(
            conversation_id = %created.id,
            message_count = count,
            replaced,
            "Guest history migrated"
        );
        if replaced {
            inner.emit(SessionUpdate::SessionReplaced);
        }
        self.refresh_conversations().await;

        Ok(MigrationOutcome::Migrated {
            conversation_id: created.id,
            messages: count,
        })
    }
}
