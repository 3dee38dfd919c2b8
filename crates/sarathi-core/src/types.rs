use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title used when a conversation has no user question to name it after.
pub const FALLBACK_TITLE: &str = "New conversation";

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is using the client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Unauthenticated; history lives only in the local guest store.
    #[default]
    Guest,
    /// Signed-in user; history is persisted server side.
    User { id: String },
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Identity::User { id: id.into() }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Guest => None,
            Identity::User { id } => Some(id),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }
}

/// Server conversation the visible session is attached to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConversationLink {
    /// Nothing persisted yet (guest, or a signed-in user before the first send).
    #[default]
    NoConversation,
    Server { id: String },
}

impl ConversationLink {
    pub fn server(id: impl Into<String>) -> Self {
        ConversationLink::Server { id: id.into() }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ConversationLink::NoConversation => None,
            ConversationLink::Server { id } => Some(id),
        }
    }
}

// =============================================================================
// Generation tokens
// =============================================================================

/// Identifies one answer stream. Only the session's current stream id may
/// mutate session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

/// Identifies one voice transcription task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

// =============================================================================
// Answer content
// =============================================================================

/// A scripture citation attached to an answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Verse label, e.g. "BG 2.47".
    pub verse: String,
    /// Relevance in [0, 1].
    pub score: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanskrit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

impl Source {
    pub fn new(verse: impl Into<String>, score: f64, text: impl Into<String>) -> Self {
        Self {
            verse: verse.into(),
            score,
            text: text.into(),
            sanskrit: None,
            translation: None,
            chapter: None,
        }
    }

    /// Returns the source with its score clamped into [0, 1].
    pub fn normalized(mut self) -> Self {
        self.score = if self.score.is_nan() {
            0.0
        } else {
            self.score.clamp(0.0, 1.0)
        };
        self
    }
}

/// Answer statistics reported by the answering service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub confidence: f64,
    /// Server-side processing time in seconds.
    pub processing_time: f64,
}

/// One event of an answer stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token { token: String },
    Source(Source),
    FollowUp { questions: Vec<String> },
    Metadata(AnswerMetadata),
    Done,
    Error { error: String },
}

impl StreamEvent {
    pub fn token(token: impl Into<String>) -> Self {
        StreamEvent::Token {
            token: token.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: error.into(),
        }
    }

    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

// =============================================================================
// Chat messages
// =============================================================================

/// A single turn in the visible conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnswerMetadata>,
    #[serde(default)]
    pub is_streaming: bool,
}

impl ChatMessage {
    fn new(role: Role, content: String, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
            sources: Vec::new(),
            follow_ups: Vec::new(),
            metadata: None,
            is_streaming,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), false)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), false)
    }

    /// Empty assistant message that receives streamed tokens.
    pub fn placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), true)
    }

    pub fn from_stored(stored: StoredMessage) -> Self {
        Self {
            id: stored.id,
            role: stored.role,
            content: stored.content,
            created_at: stored.created_at.unwrap_or_else(Utc::now),
            sources: stored.sources,
            follow_ups: Vec::new(),
            metadata: stored.confidence.map(|confidence| AnswerMetadata {
                confidence,
                processing_time: stored.processing_time.unwrap_or_default(),
            }),
            is_streaming: false,
        }
    }

    pub fn from_persisted(persisted: PersistedMessage) -> Self {
        Self {
            id: persisted.id,
            role: persisted.role,
            content: persisted.content,
            created_at: persisted.timestamp,
            sources: Vec::new(),
            follow_ups: Vec::new(),
            metadata: None,
            is_streaming: false,
        }
    }
}

/// Locally persisted form of a guest chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// RFC 3339 on disk.
    pub timestamp: DateTime<Utc>,
}

impl From<&ChatMessage> for PersistedMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id.clone(),
            role: msg.role,
            content: msg.content.clone(),
            timestamp: msg.created_at,
        }
    }
}

// =============================================================================
// Remote shapes
// =============================================================================

/// Row of the conversation list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: Option<u32>,
}

/// A message as stored by the conversation service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// A conversation with (optionally) its full transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// A message to append to a server conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            confidence: None,
            processing_time: None,
            sources: Vec::new(),
        }
    }
}

impl From<&ChatMessage> for NewMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            confidence: msg.metadata.as_ref().map(|m| m.confidence),
            processing_time: msg.metadata.as_ref().map(|m| m.processing_time),
            sources: msg.sources.clone(),
        }
    }
}

/// One recent turn inside a context bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub content: String,
}

/// Short-term (recent turns) and long-term (summary) memory for a conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub recent: Vec<ContextTurn>,
}

/// Recorded audio payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Speech-to-text result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Text-to-speech request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub language: String,
    pub voice: String,
    pub speed: f32,
}

// =============================================================================
// Helpers
// =============================================================================

/// Conversation title from a question: the first `max_chars` characters,
/// followed by "..." when the question was longer.
pub fn derive_title(question: &str, max_chars: usize) -> String {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", head.trim_end())
}

// =============================================================================
// Tests
// =============================================================================
