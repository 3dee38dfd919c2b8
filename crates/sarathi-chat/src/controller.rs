//! Chat session controller: central coordinator between the visible session,
//! the answer stream, conversation persistence and the guest store.
//!
//! One stream at a time may mutate the session. Each question mints a fresh
//! [`StreamId`]; every stream callback re-checks it under the state lock and
//! becomes a no-op once a newer question, a stop, a new chat or a load has
//! replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{FutureExt, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use sarathi_core::config::{ChatConfig, SarathiConfig, VoiceConfig};
use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::{
    derive_title, ChatMessage, ConversationLink, Identity, NewMessage, StreamEvent, StreamId,
};
use sarathi_remote::{AnswerRequest, ConversationService, TextStreamService, VoiceService};
use sarathi_storage::GuestMessageStore;

use crate::context;
use crate::migration::MigrationOutcome;
use crate::session::{
    ActiveStream, ConversationCreation, Finish, PendingConversation, SessionState, SessionUpdate,
    SessionView,
};
use crate::voice::Microphone;

/// Capacity of the update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// External collaborators of the controller.
#[derive(Clone)]
pub struct ChatServices {
    pub text: Arc<dyn TextStreamService>,
    pub conversations: Arc<dyn ConversationService>,
    pub voice: Arc<dyn VoiceService>,
    pub microphone: Arc<dyn Microphone>,
}

/// How a submitted question ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The service sent `done`.
    Completed,
    /// The stream closed without a terminal event; finalized anyway.
    EndedWithoutDone,
    /// The service reported an error or the stream could not be opened.
    Failed,
    /// Stopped, or replaced by something newer before it finished.
    Cancelled,
}

/// Where the turns of a new question will be saved.
enum ConversationTarget {
    Linked(String),
    /// `opened` is set for the question that started the creation.
    Creating {
        epoch: u64,
        created: ConversationCreation,
        opened: bool,
    },
    Unsaved,
}

pub(crate) struct Inner {
    pub services: ChatServices,
    pub guest_store: GuestMessageStore,
    pub chat: ChatConfig,
    pub voice: VoiceConfig,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    updates: broadcast::Sender<SessionUpdate>,
}

impl Inner {
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next value of the shared stream/task generation counter.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn emit(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
        }
        state.recording = None;
    }
}

/// Owns the visible chat session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ChatController {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("guest_store", &self.inner.guest_store)
            .field("generation", &self.inner.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChatController {
    pub fn new(
        services: ChatServices,
        guest_store: GuestMessageStore,
        config: &SarathiConfig,
        identity: Identity,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = SessionState::new(identity, config.general.default_language.clone());
        Self {
            inner: Arc::new(Inner {
                services,
                guest_store,
                chat: config.chat.clone(),
                voice: config.voice.clone(),
                state: Mutex::new(state),
                generation: AtomicU64::new(0),
                updates,
            }),
        }
    }

    /// Receive change notifications for rendering.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionView {
        self.inner.lock().view()
    }

    pub fn identity(&self) -> Identity {
        self.inner.lock().identity.clone()
    }

    pub fn language(&self) -> String {
        self.inner.lock().language.clone()
    }

    pub fn set_language(&self, language: impl Into<String>) {
        self.inner.lock().language = language.into();
    }

    pub fn input(&self) -> String {
        self.inner.lock().input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner.lock().input = text.into();
    }

    // =========================================================================
    // Asking
    // =========================================================================

    /// Ask a question and stream the answer into the session.
    ///
    /// Resolves once this question's stream is finished, failed, stopped or
    /// superseded. Fails only when the question is empty or voice input is
    /// active; service failures end up in the visible answer instead.
    pub async fn submit_question(&self, text: &str) -> Result<StreamOutcome> {
        let question = text.trim();
        if question.is_empty() {
            return Err(SarathiError::EmptyQuestion);
        }

        let inner = &self.inner;
        let stream_id = StreamId(inner.next_generation());
        let cancel = CancellationToken::new();

        let (user_message, placeholder_id, superseded, identity, target, language, local_context) = {
            let mut state = inner.lock();
            if state.voice.is_busy() {
                return Err(SarathiError::VoiceBusy);
            }
            let superseded = state.finalize_active(&Finish::Stopped, &inner.chat);
            let local_context = context::local_summary(
                state.finished_messages(),
                inner.chat.local_context_messages,
                inner.chat.local_context_chars,
            );

            let user_message = ChatMessage::user(question);
            let linked = state.link.id().map(str::to_string);
            let user_id = state.identity.user_id().map(str::to_string);
            let target = match (linked, user_id) {
                (Some(id), _) => ConversationTarget::Linked(id),
                (None, Some(user_id)) => self.conversation_for(&mut state, &user_id, &user_message),
                (None, None) => ConversationTarget::Unsaved,
            };

            let placeholder = ChatMessage::placeholder();
            let placeholder_id = placeholder.id.clone();
            state.messages.push(user_message.clone());
            state.messages.push(placeholder);
            state.active = Some(ActiveStream {
                id: stream_id,
                placeholder_id: placeholder_id.clone(),
                cancel: cancel.clone(),
                metadata: None,
            });
            state.loading = true;
            state.input.clear();
            state.view += 1;
            (
                user_message,
                placeholder_id,
                superseded,
                state.identity.clone(),
                target,
                state.language.clone(),
                local_context,
            )
        };

        if let Some(previous) = superseded {
            tracing::debug!(message_id = %previous.id, "Previous answer superseded");
            inner.emit(SessionUpdate::MessageFinalized { id: previous.id });
        }
        inner.emit(SessionUpdate::MessageAppended {
            id: user_message.id.clone(),
        });
        inner.emit(SessionUpdate::MessageAppended { id: placeholder_id });
        tracing::info!(stream_id = %stream_id, question_len = question.len(), "Question submitted");

        if identity.is_guest() {
            self.save_guest_history();
        }

        // The question that opens a conversation is saved along with it.
        let (conversation_id, user_saved) = match target {
            ConversationTarget::Linked(id) => (Some(id), false),
            ConversationTarget::Creating {
                epoch,
                created,
                opened,
            } => (self.link_created(epoch, created).await, opened),
            ConversationTarget::Unsaved => (None, false),
        };
        if !inner.lock().is_current(stream_id) {
            // Stopped or superseded; the question itself still belongs to
            // the conversation.
            if let (Some(cid), false) = (conversation_id.as_deref(), user_saved) {
                self.persist_message(cid, NewMessage::from(&user_message))
                    .await;
            }
            return Ok(StreamOutcome::Cancelled);
        }

        let request = AnswerRequest {
            question: question.to_string(),
            user_id: identity.user_id().map(str::to_string),
            language,
            context: String::new(),
            conversation_id: conversation_id.clone(),
        };

        let persist_user = async {
            if let (Some(cid), false) = (conversation_id.as_deref(), user_saved) {
                self.persist_message(cid, NewMessage::from(&user_message))
                    .await;
            }
        };
        let answer = async {
            let mut request = request;
            request.context = self
                .build_context(conversation_id.as_deref(), local_context)
                .await;
            self.run_stream(stream_id, request, cancel).await
        };
        let ((), (outcome, finished)) = tokio::join!(persist_user, answer);

        // Saved after the user turn so the server keeps them in order.
        if let (Some(cid), Some(message)) = (conversation_id.as_deref(), finished) {
            if !message.content.trim().is_empty() {
                self.persist_message(cid, NewMessage::from(&message)).await;
                self.refresh_conversations().await;
            }
        }

        tracing::info!(stream_id = %stream_id, outcome = ?outcome, "Answer finished");
        Ok(outcome)
    }

    /// Stop the active answer, keeping what has arrived so far.
    ///
    /// Returns `false` when nothing was streaming.
    pub fn stop_streaming(&self) -> bool {
        let (message, guest) = {
            let mut state = self.inner.lock();
            let Some(message) = state.finalize_active(&Finish::Stopped, &self.inner.chat) else {
                return false;
            };
            (message, state.identity.is_guest())
        };
        tracing::info!(message_id = %message.id, "Answer stopped");
        self.inner
            .emit(SessionUpdate::MessageFinalized { id: message.id });
        if guest {
            self.save_guest_history();
        }
        true
    }

    /// Join the conversation already being created for this session, or
    /// start creating one with `first` as its opening question.
    fn conversation_for(
        &self,
        state: &mut SessionState,
        user_id: &str,
        first: &ChatMessage,
    ) -> ConversationTarget {
        let epoch = state.epoch;
        if let Some(pending) = state.creating.as_ref().filter(|p| p.epoch == epoch) {
            return ConversationTarget::Creating {
                epoch,
                created: pending.created.clone(),
                opened: false,
            };
        }

        let conversations = self.inner.services.conversations.clone();
        let title = derive_title(&first.content, self.inner.chat.title_max_chars);
        let language = state.language.clone();
        let user_id = user_id.to_string();
        let opening = NewMessage::from(first);
        // Runs to completion even if every waiter goes away.
        let task = tokio::spawn(async move {
            let created = match conversations
                .create_conversation(&user_id, &title, &language)
                .await
            {
                Ok(created) => created,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create conversation; answering unsaved");
                    return None;
                }
            };
            if let Err(e) = conversations.append_message(&created.id, opening).await {
                tracing::warn!(
                    conversation_id = %created.id,
                    error = %e,
                    "Failed to persist opening question"
                );
            }
            Some(created)
        });
        let created = async move { task.await.ok().flatten() }.boxed().shared();
        state.creating = Some(PendingConversation {
            epoch,
            created: created.clone(),
        });
        ConversationTarget::Creating {
            epoch,
            created,
            opened: true,
        }
    }

    /// Wait for a pending creation and link it to the session, unless the
    /// session moved on to another conversation in the meantime.
    async fn link_created(&self, epoch: u64, created: ConversationCreation) -> Option<String> {
        let created = created.await;
        let linked = {
            let mut state = self.inner.lock();
            if state.epoch == epoch {
                state.creating = None;
            }
            let created = created?;
            if state.epoch == epoch && state.link == ConversationLink::NoConversation {
                state.link = ConversationLink::server(created.id.clone());
                tracing::debug!(conversation_id = %created.id, "Conversation linked");
            }
            let id = created.id.clone();
            if state.epoch == epoch && !state.conversations.iter().any(|c| c.id == id) {
                state.conversations.insert(0, created);
                Some((id, true))
            } else {
                Some((id, false))
            }
        };
        let (id, listed) = linked?;
        if listed {
            self.inner.emit(SessionUpdate::ConversationsUpdated);
        }
        Some(id)
    }

    async fn build_context(&self, conversation_id: Option<&str>, local: String) -> String {
        if let Some(cid) = conversation_id {
            match self
                .inner
                .services
                .conversations
                .fetch_context(cid, self.inner.chat.context_message_count)
                .await
            {
                Ok(bundle) => {
                    if let Some(text) =
                        context::from_bundle(&bundle, self.inner.chat.local_context_chars)
                    {
                        return text;
                    }
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %cid, error = %e, "Context fetch failed; using local history");
                }
            }
        }
        local
    }

    /// Drive one answer stream to its end.
    ///
    /// The finalized message comes back only when the answer completed
    /// (with or without `done`) and should be persisted.
    async fn run_stream(
        &self,
        stream_id: StreamId,
        request: AnswerRequest,
        cancel: CancellationToken,
    ) -> (StreamOutcome, Option<ChatMessage>) {
        let text = self.inner.services.text.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = text.stream_answer(request, cancel.clone()) => Some(opened),
        };
        let mut events = match opened {
            None => {
                self.finish(stream_id, Finish::Stopped);
                return (StreamOutcome::Cancelled, None);
            }
            Some(Err(e)) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Failed to open answer stream");
                return (self.fail(stream_id, e.to_string()), None);
            }
            Some(Ok(events)) => events,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.finish(stream_id, Finish::Stopped);
                    return (StreamOutcome::Cancelled, None);
                }
                next = events.next() => next,
            };
            match next {
                Some(Ok(StreamEvent::Done)) => {
                    return self.complete(stream_id, Finish::Completed);
                }
                Some(Ok(StreamEvent::Error { error })) => {
                    tracing::warn!(stream_id = %stream_id, error = %error, "Answer stream reported an error");
                    return (self.fail(stream_id, error), None);
                }
                Some(Ok(event)) => {
                    if !self.apply(stream_id, event) {
                        tracing::debug!(stream_id = %stream_id, "Stale stream; dropping");
                        return (StreamOutcome::Cancelled, None);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "Answer stream failed");
                    return (self.fail(stream_id, e.to_string()), None);
                }
                None => {
                    tracing::debug!(stream_id = %stream_id, "Stream ended without done");
                    return self.complete(stream_id, Finish::EndedWithoutDone);
                }
            }
        }
    }

    /// Apply one non-terminal event. Returns `false` if the stream is stale.
    fn apply(&self, stream_id: StreamId, event: StreamEvent) -> bool {
        let update = {
            let mut state = self.inner.lock();
            if !state.is_current(stream_id) {
                return false;
            }
            match event {
                StreamEvent::Token { token } => {
                    let Some(message) = state.placeholder_mut() else {
                        return false;
                    };
                    message.content.push_str(&token);
                    SessionUpdate::ContentDelta {
                        id: message.id.clone(),
                        token,
                    }
                }
                StreamEvent::Source(source) => {
                    let Some(message) = state.placeholder_mut() else {
                        return false;
                    };
                    message.sources.push(source.normalized());
                    SessionUpdate::MessageUpdated {
                        id: message.id.clone(),
                    }
                }
                StreamEvent::FollowUp { questions } => {
                    let Some(message) = state.placeholder_mut() else {
                        return false;
                    };
                    message.follow_ups = questions.clone();
                    let id = message.id.clone();
                    state.suggestions = questions;
                    SessionUpdate::MessageUpdated { id }
                }
                StreamEvent::Metadata(metadata) => {
                    if let Some(active) = state.active.as_mut() {
                        active.metadata = Some(metadata);
                    }
                    return true;
                }
                StreamEvent::Done | StreamEvent::Error { .. } => return true,
            }
        };
        self.inner.emit(update);
        true
    }

    /// Finalize the placeholder if `stream_id` is still current.
    fn finish(&self, stream_id: StreamId, how: Finish) -> Option<ChatMessage> {
        let (message, guest) = {
            let mut state = self.inner.lock();
            if !state.is_current(stream_id) {
                return None;
            }
            let message = state.finalize_active(&how, &self.inner.chat)?;
            (message, state.identity.is_guest())
        };
        self.inner.emit(SessionUpdate::MessageFinalized {
            id: message.id.clone(),
        });
        if guest {
            self.save_guest_history();
        }
        Some(message)
    }

    fn fail(&self, stream_id: StreamId, error: String) -> StreamOutcome {
        match self.finish(stream_id, Finish::Failed(error)) {
            Some(_) => StreamOutcome::Failed,
            None => StreamOutcome::Cancelled,
        }
    }

    fn complete(&self, stream_id: StreamId, how: Finish) -> (StreamOutcome, Option<ChatMessage>) {
        let outcome = match how {
            Finish::EndedWithoutDone => StreamOutcome::EndedWithoutDone,
            _ => StreamOutcome::Completed,
        };
        match self.finish(stream_id, how) {
            Some(message) => (outcome, Some(message)),
            None => (StreamOutcome::Cancelled, None),
        }
    }

    async fn persist_message(&self, conversation_id: &str, message: NewMessage) {
        let role = message.role;
        if let Err(e) = self
            .inner
            .services
            .conversations
            .append_message(conversation_id, message)
            .await
        {
            tracing::warn!(
                conversation_id = %conversation_id,
                role = %role,
                error = %e,
                "Failed to persist message"
            );
        }
    }

    pub(crate) fn save_guest_history(&self) {
        let messages = self.inner.lock().messages.clone();
        if let Err(e) = self.inner.guest_store.save(&messages) {
            tracing::warn!(error = %e, "Failed to save guest history");
        }
    }

    // =========================================================================
    // Session management
    // =========================================================================

    /// Drop the current session and start over.
    ///
    /// Cancels the active stream, releases the microphone and, for a guest,
    /// clears the stored history.
    pub async fn start_new_chat(&self) {
        let guest = {
            let mut state = self.inner.lock();
            state.reset();
            state.identity.is_guest()
        };
        self.cancel_voice_input().await;
        if guest {
            if let Err(e) = self.inner.guest_store.clear() {
                tracing::warn!(error = %e, "Failed to clear guest history");
            }
        }
        tracing::info!("New chat started");
        self.inner.emit(SessionUpdate::SessionReplaced);
    }

    /// Replace the session with a stored conversation.
    ///
    /// Returns `false` when the fetch failed or a newer action replaced the
    /// session in the meantime; the visible session is then left as is.
    pub async fn load_conversation(&self, id: &str) -> bool {
        let (view, stopped) = {
            let mut state = self.inner.lock();
            let stopped = state.finalize_active(&Finish::Stopped, &self.inner.chat);
            state.view += 1;
            (state.view, stopped)
        };
        if let Some(message) = stopped {
            self.inner
                .emit(SessionUpdate::MessageFinalized { id: message.id });
        }

        let conversation = match self
            .inner
            .services
            .conversations
            .get_conversation(id, true)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "Failed to load conversation");
                return false;
            }
        };

        {
            let mut state = self.inner.lock();
            if state.view != view {
                tracing::debug!(conversation_id = %id, "Discarding stale conversation load");
                return false;
            }
            state.messages = conversation
                .messages
                .into_iter()
                .map(ChatMessage::from_stored)
                .collect();
            if let Some(language) = conversation.language.filter(|l| !l.is_empty()) {
                state.language = language;
            }
            state.link = ConversationLink::server(conversation.id);
            state.epoch += 1;
            state.creating = None;
            state.input.clear();
            tracing::info!(
                conversation_id = %id,
                message_count = state.messages.len(),
                "Conversation loaded"
            );
        }
        self.inner.emit(SessionUpdate::SessionReplaced);
        true
    }

    /// Delete a stored conversation; clears the session if it was open.
    pub async fn delete_conversation(&self, id: &str) -> bool {
        if let Err(e) = self
            .inner
            .services
            .conversations
            .delete_conversation(id)
            .await
        {
            tracing::warn!(conversation_id = %id, error = %e, "Failed to delete conversation");
            return false;
        }

        let was_open = {
            let mut state = self.inner.lock();
            state.conversations.retain(|c| c.id != id);
            let was_open = state.link.id() == Some(id);
            if was_open {
                state.reset();
            }
            was_open
        };
        tracing::info!(conversation_id = %id, was_open, "Conversation deleted");
        self.inner.emit(SessionUpdate::ConversationsUpdated);
        if was_open {
            self.inner.emit(SessionUpdate::SessionReplaced);
        }
        true
    }

    /// Reload the cached conversation list for the signed-in user.
    pub async fn refresh_conversations(&self) {
        let Some(user_id) = self.identity().user_id().map(str::to_string) else {
            return;
        };
        match self
            .inner
            .services
            .conversations
            .list_conversations(&user_id)
            .await
        {
            Ok(conversations) => {
                {
                    let mut state = self.inner.lock();
                    if state.identity.user_id() != Some(user_id.as_str()) {
                        return;
                    }
                    state.conversations = conversations;
                }
                self.inner.emit(SessionUpdate::ConversationsUpdated);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to refresh conversations");
            }
        }
    }

    /// Fetch suggested starter questions for the signed-in user.
    pub async fn load_suggestions(&self) {
        let Some(user_id) = self.identity().user_id().map(str::to_string) else {
            return;
        };
        match self
            .inner
            .services
            .conversations
            .suggested_questions(&user_id)
            .await
        {
            Ok(questions) => {
                let mut state = self.inner.lock();
                if state.identity.user_id() == Some(user_id.as_str()) {
                    state.suggestions = questions;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load suggested questions");
            }
        }
    }

    /// Load a guest's stored history into an empty session.
    ///
    /// Returns the number of messages restored.
    pub fn restore_guest_session(&self) -> usize {
        let messages = match self.inner.guest_store.load_messages() {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read guest history");
                return 0;
            }
        };
        let count = {
            let mut state = self.inner.lock();
            if !state.identity.is_guest() || !state.messages.is_empty() || messages.is_empty() {
                return 0;
            }
            state.messages = messages;
            state.view += 1;
            state.epoch += 1;
            state.messages.len()
        };
        tracing::info!(message_count = count, "Guest session restored");
        self.inner.emit(SessionUpdate::SessionReplaced);
        count
    }

    /// Switch who is using the client.
    ///
    /// Signing in migrates the guest history once; signing out or switching
    /// users clears the session and cached lists.
    pub async fn set_identity(&self, identity: Identity) {
        if self.identity().is_guest() && !identity.is_guest() {
            // Migration takes the answer as it stands.
            self.stop_streaming();
        }
        let previous = {
            let mut state = self.inner.lock();
            std::mem::replace(&mut state.identity, identity.clone())
        };
        if previous == identity {
            return;
        }

        match (&previous, &identity) {
            (Identity::Guest, Identity::User { id }) => {
                tracing::info!(user_id = %id, "Signed in");
                let migrated = match self.migrate_guest_history(id).await {
                    Ok(outcome) => matches!(outcome, MigrationOutcome::Migrated { .. }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Guest migration failed; guest history kept");
                        false
                    }
                };
                if !migrated {
                    self.refresh_conversations().await;
                }
                self.load_suggestions().await;
            }
            (_, _) => {
                {
                    let mut state = self.inner.lock();
                    state.reset();
                    state.conversations.clear();
                    state.suggestions.clear();
                }
                self.cancel_voice_input().await;
                tracing::info!(signed_in = !identity.is_guest(), "Identity changed; session cleared");
                self.inner.emit(SessionUpdate::SessionReplaced);
                self.inner.emit(SessionUpdate::ConversationsUpdated);
                self.refresh_conversations().await;
                self.load_suggestions().await;
            }
        }
    }

    /// Stop everything in flight. The session contents are kept.
    pub async fn shutdown(&self) {
        self.stop_streaming();
        self.cancel_voice_input().await;
        tracing::debug!("Chat controller shut down");
    }
}
