//! Contracts for the three remote collaborators of the chat controller.
//!
//! The controller only sees these traits; HTTP implementations live in the
//! sibling modules and tests substitute in-process fakes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use sarathi_core::error::Result;
use sarathi_core::types::{
    AudioClip, ContextBundle, Conversation, ConversationSummary, NewMessage, SpeechRequest,
    StoredMessage, StreamEvent, Transcription,
};

/// Ordered, finite answer events. Not restartable.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Everything the answering service needs for one question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub language: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Streams an answer to a question.
#[async_trait]
pub trait TextStreamService: Send + Sync {
    /// Open the answer stream. Cancelling `cancel` ends the stream for good.
    async fn stream_answer(
        &self,
        request: AnswerRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream>;
}

/// Server-side conversation persistence.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>>;

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        language: &str,
    ) -> Result<ConversationSummary>;

    async fn get_conversation(&self, id: &str, include_messages: bool) -> Result<Conversation>;

    async fn append_message(&self, conversation_id: &str, message: NewMessage)
        -> Result<StoredMessage>;

    /// Summary plus at most `message_count` recent turns.
    async fn fetch_context(&self, conversation_id: &str, message_count: usize)
        -> Result<ContextBundle>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;

    async fn suggested_questions(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Speech-to-text and text-to-speech.
#[async_trait]
pub trait VoiceService: Send + Sync {
    /// `language` is a code or "auto".
    async fn transcribe(
        &self,
        audio: AudioClip,
        language: &str,
        user_id: Option<&str>,
    ) -> Result<Transcription>;

    async fn synthesize(&self, request: SpeechRequest) -> Result<AudioClip>;
}
