//! Visible session state and the mutations the controller applies to it.
//!
//! Every mutation coming from an answer stream goes through
//! [`SessionState::is_current`] first; a stream whose id is no longer the
//! active one has no observable effect.

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use sarathi_core::config::ChatConfig;
use sarathi_core::types::{
    AnswerMetadata, ChatMessage, ConversationLink, ConversationSummary, Identity, StreamId,
    TaskId,
};

use crate::voice::{RecordingSession, VoiceState};

/// How a streaming placeholder is closed out.
#[derive(Debug, Clone, PartialEq)]
pub enum Finish {
    /// Explicit `done` event.
    Completed,
    /// Stream closed without a terminal event.
    EndedWithoutDone,
    /// Stopped by the user or superseded by a newer question.
    Stopped,
    /// Stream error or failure to open the stream.
    Failed(String),
}

/// Bookkeeping for the one stream allowed to mutate the session.
#[derive(Debug)]
pub(crate) struct ActiveStream {
    pub id: StreamId,
    pub placeholder_id: String,
    pub cancel: CancellationToken,
    /// Held back until the answer finishes.
    pub metadata: Option<AnswerMetadata>,
}

/// Resolves to the new conversation, or `None` when creation failed.
pub(crate) type ConversationCreation = Shared<BoxFuture<'static, Option<ConversationSummary>>>;

/// A server conversation being created for the session.
pub(crate) struct PendingConversation {
    /// Session epoch the conversation was requested in.
    pub epoch: u64,
    pub created: ConversationCreation,
}

/// Change notifications for front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    MessageAppended { id: String },
    ContentDelta { id: String, token: String },
    MessageUpdated { id: String },
    MessageFinalized { id: String },
    SessionReplaced,
    ConversationsUpdated,
    VoiceChanged { state: VoiceState },
}

pub(crate) struct SessionState {
    pub identity: Identity,
    pub link: ConversationLink,
    pub messages: Vec<ChatMessage>,
    pub language: String,
    pub input: String,
    pub active: Option<ActiveStream>,
    pub loading: bool,
    /// Bumped whenever the set of visible messages is replaced or a new
    /// exchange starts; pending loads compare against it.
    pub view: u64,
    /// Bumped whenever the session stops belonging to its conversation
    /// (new chat, load, identity change, migration).
    pub epoch: u64,
    pub creating: Option<PendingConversation>,
    pub voice: VoiceState,
    pub voice_task: Option<TaskId>,
    pub recording: Option<RecordingSession>,
    pub conversations: Vec<ConversationSummary>,
    pub suggestions: Vec<String>,
}

impl SessionState {
    pub fn new(identity: Identity, language: String) -> Self {
        Self {
            identity,
            link: ConversationLink::NoConversation,
            messages: Vec::new(),
            language,
            input: String::new(),
            active: None,
            loading: false,
            view: 0,
            epoch: 0,
            creating: None,
            voice: VoiceState::Idle,
            voice_task: None,
            recording: None,
            conversations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn is_current(&self, id: StreamId) -> bool {
        self.active.as_ref().map(|a| a.id) == Some(id)
    }

    pub fn placeholder_mut(&mut self) -> Option<&mut ChatMessage> {
        let placeholder_id = self.active.as_ref()?.placeholder_id.clone();
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.id == placeholder_id)
    }

    /// Close the active placeholder and release the active stream.
    ///
    /// Returns the finalized message, or `None` when no stream was active.
    pub fn finalize_active(&mut self, how: &Finish, config: &ChatConfig) -> Option<ChatMessage> {
        let active = self.active.take()?;
        active.cancel.cancel();
        self.loading = false;

        let message = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == active.placeholder_id)?;
        message.is_streaming = false;
        match how {
            Finish::Completed | Finish::EndedWithoutDone => {
                if active.metadata.is_some() {
                    message.metadata = active.metadata;
                }
            }
            Finish::Stopped => message.content.push_str(&config.stop_marker),
            Finish::Failed(error) => {
                if message.content.is_empty() {
                    message.content = format!("{} {}", config.error_marker, error);
                } else {
                    message.content = format!(
                        "{}\n\n{} {}",
                        message.content, config.error_marker, error
                    );
                }
            }
        }
        Some(message.clone())
    }

    /// Drop every visible message and detach from any conversation.
    ///
    /// Any active stream is cancelled without finalizing since its
    /// placeholder disappears with the rest of the messages.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.loading = false;
        self.messages.clear();
        self.input.clear();
        self.link = ConversationLink::NoConversation;
        self.view += 1;
        self.epoch += 1;
        self.creating = None;
    }

    /// Messages eligible for the local context summary.
    pub fn finished_messages(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| !m.is_streaming)
    }

    #[cfg(test)]
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            identity: self.identity.clone(),
            link: self.link.clone(),
            messages: self.messages.clone(),
            language: self.language.clone(),
            input: self.input.clone(),
            active_stream: self.active.as_ref().map(|a| a.id),
            is_loading: self.loading,
            voice: self.voice,
            conversations: self.conversations.clone(),
            suggestions: self.suggestions.clone(),
        }
    }
}

/// Read-only copy of the session for rendering.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub identity: Identity,
    pub link: ConversationLink,
    pub messages: Vec<ChatMessage>,
    pub language: String,
    pub input: String,
    pub active_stream: Option<StreamId>,
    pub is_loading: bool,
    pub voice: VoiceState,
    pub conversations: Vec<ConversationSummary>,
    pub suggestions: Vec<String>,
}

impl SessionView {
    pub fn is_recording(&self) -> bool {
        self.voice == VoiceState::Recording
    }

    pub fn is_transcribing(&self) -> bool {
        self.voice == VoiceState::Transcribing
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }
}

// =============================================================================
// Tests
// =============================================================================
