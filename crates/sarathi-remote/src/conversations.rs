//! JSON client for the conversation persistence API.

use async_trait::async_trait;
use serde::Serialize;

use sarathi_core::error::Result;
use sarathi_core::types::{
    ContextBundle, Conversation, ConversationSummary, NewMessage, StoredMessage,
};

use crate::client::{path_segment, HttpBackend};
use crate::services::ConversationService;

#[derive(Serialize)]
struct CreateConversationBody<'a> {
    user_id: &'a str,
    title: &'a str,
    language: &'a str,
}

/// [`ConversationService`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpConversationService {
    backend: HttpBackend,
}

impl HttpConversationService {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ConversationService for HttpConversationService {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let request = self
            .backend
            .get("/api/conversations")
            .query(&[("user_id", user_id)]);
        self.backend.send_json(request).await
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        language: &str,
    ) -> Result<ConversationSummary> {
        let request = self.backend.post("/api/conversations").json(&CreateConversationBody {
            user_id,
            title,
            language,
        });
        let created: ConversationSummary = self.backend.send_json(request).await?;
        tracing::info!(conversation_id = %created.id, "Conversation created");
        Ok(created)
    }

    async fn get_conversation(&self, id: &str, include_messages: bool) -> Result<Conversation> {
        let request = self
            .backend
            .get(&format!("/api/conversations/{}", path_segment(id)))
            .query(&[("include_messages", include_messages)]);
        self.backend.send_json(request).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<StoredMessage> {
        let request = self
            .backend
            .post(&format!(
                "/api/conversations/{}/messages",
                path_segment(conversation_id)
            ))
            .json(&message);
        self.backend.send_json(request).await
    }

    async fn fetch_context(
        &self,
        conversation_id: &str,
        message_count: usize,
    ) -> Result<ContextBundle> {
        let request = self
            .backend
            .get(&format!(
                "/api/conversations/{}/context",
                path_segment(conversation_id)
            ))
            .query(&[("message_count", message_count)]);
        self.backend.send_json(request).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let request = self
            .backend
            .delete(&format!("/api/conversations/{}", path_segment(id)));
        self.backend.send_empty(request).await
    }

    async fn suggested_questions(&self, user_id: &str) -> Result<Vec<String>> {
        let request = self
            .backend
            .get("/api/suggestions")
            .query(&[("user_id", user_id)]);
        self.backend.send_json(request).await
    }
}

// =============================================================================
// Tests
// =============================================================================
