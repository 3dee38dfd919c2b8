//! In-process fakes for the controller's collaborators.
//!
//! Answer streams are fed through unbounded channels so each test scripts
//! the exact interleaving it needs.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use futures::StreamExt;
use sarathi_chat::{ChatController, ChatServices, Microphone, Recording};
use sarathi_core::config::SarathiConfig;
use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::{
    AudioClip, ContextBundle, Conversation, ConversationSummary, Identity, NewMessage, Role,
    Source, SpeechRequest, StoredMessage, StreamEvent, Transcription,
};
use sarathi_remote::{
    AnswerRequest, ConversationService, EventStream, TextStreamService, VoiceService,
};
use sarathi_storage::{GuestMessageStore, KeyValueStore, MemoryStore};

pub type EventSender = mpsc::UnboundedSender<Result<StreamEvent>>;

// =============================================================================
// Text streaming
// =============================================================================

enum Script {
    Events(mpsc::UnboundedReceiver<Result<StreamEvent>>),
    OpenError(String),
}

#[derive(Default)]
pub struct ScriptedTextService {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<AnswerRequest>>,
}

impl ScriptedTextService {
    /// Queue a stream for the next question and return its feeding end.
    pub fn script(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Events(rx));
        tx
    }

    pub fn fail_next_open(&self, error: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::OpenError(error.to_string()));
    }

    pub fn requests(&self) -> Vec<AnswerRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextStreamService for ScriptedTextService {
    async fn stream_answer(
        &self,
        request: AnswerRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(Script::OpenError(error)) => Err(SarathiError::Transport(error)),
            None => Err(SarathiError::Transport("no scripted stream".to_string())),
        }
    }
}

/// Send events, ignoring a receiver that already went away.
pub fn send(tx: &EventSender, events: impl IntoIterator<Item = StreamEvent>) {
    for event in events {
        let _ = tx.send(Ok(event));
    }
}

pub fn bg_2_47() -> StreamEvent {
    StreamEvent::Source(Source::new(
        "BG 2.47",
        0.9,
        "You have a right to perform your prescribed duty...",
    ))
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Default)]
pub struct FakeConversations {
    pub created: Mutex<Vec<(String, String, String)>>,
    pub appended: Mutex<Vec<(String, NewMessage)>>,
    pub deleted: Mutex<Vec<String>>,
    pub list: Mutex<Vec<ConversationSummary>>,
    pub stored: Mutex<HashMap<String, Conversation>>,
    pub context: Mutex<Option<ContextBundle>>,
    pub suggestions: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_context: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Appends fail once this many have succeeded.
    pub fail_append_after: Mutex<Option<usize>>,
    /// When set, the next creation waits for the paired sender.
    pub create_gate: Mutex<Option<oneshot::Receiver<()>>>,
    next_id: AtomicU64,
}

impl FakeConversations {
    pub fn hold_create(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.create_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn created(&self) -> Vec<(String, String, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn appended(&self) -> Vec<(String, NewMessage)> {
        self.appended.lock().unwrap().clone()
    }

    pub fn store_conversation(&self, id: &str, language: &str, messages: &[(Role, &str)]) {
        let conversation = Conversation {
            id: id.to_string(),
            title: "Stored".to_string(),
            language: Some(language.to_string()),
            messages: messages
                .iter()
                .enumerate()
                .map(|(i, (role, content))| StoredMessage {
                    id: format!("{}-m{}", id, i),
                    role: *role,
                    content: content.to_string(),
                    created_at: None,
                    confidence: None,
                    processing_time: None,
                    sources: Vec::new(),
                })
                .collect(),
        };
        self.list.lock().unwrap().push(ConversationSummary {
            id: id.to_string(),
            title: conversation.title.clone(),
            language: conversation.language.clone(),
            updated_at: None,
            message_count: None,
        });
        self.stored
            .lock()
            .unwrap()
            .insert(id.to_string(), conversation);
    }
}

#[async_trait]
impl ConversationService for FakeConversations {
    async fn list_conversations(&self, _user_id: &str) -> Result<Vec<ConversationSummary>> {
        Ok(self.list.lock().unwrap().clone())
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        language: &str,
    ) -> Result<ConversationSummary> {
        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SarathiError::Service("500: create failed".to_string()));
        }
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().unwrap().push((
            user_id.to_string(),
            title.to_string(),
            language.to_string(),
        ));
        let summary = ConversationSummary {
            id,
            title: title.to_string(),
            language: Some(language.to_string()),
            updated_at: None,
            message_count: Some(0),
        };
        self.list.lock().unwrap().insert(0, summary.clone());
        Ok(summary)
    }

    async fn get_conversation(&self, id: &str, _include_messages: bool) -> Result<Conversation> {
        self.stored
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SarathiError::Service(format!("404: {} not found", id)))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<StoredMessage> {
        let mut appended = self.appended.lock().unwrap();
        if let Some(limit) = *self.fail_append_after.lock().unwrap() {
            if appended.len() >= limit {
                return Err(SarathiError::Service("500: append failed".to_string()));
            }
        }
        appended.push((conversation_id.to_string(), message.clone()));
        Ok(StoredMessage {
            id: format!("s{}", appended.len()),
            role: message.role,
            content: message.content,
            created_at: None,
            confidence: message.confidence,
            processing_time: message.processing_time,
            sources: message.sources,
        })
    }

    async fn fetch_context(
        &self,
        _conversation_id: &str,
        _message_count: usize,
    ) -> Result<ContextBundle> {
        if self.fail_context.load(Ordering::SeqCst) {
            return Err(SarathiError::Service("503: memory unavailable".to_string()));
        }
        Ok(self.context.lock().unwrap().clone().unwrap_or_default())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SarathiError::Service("500: delete failed".to_string()));
        }
        self.deleted.lock().unwrap().push(id.to_string());
        self.list.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }

    async fn suggested_questions(&self, _user_id: &str) -> Result<Vec<String>> {
        Ok(self.suggestions.lock().unwrap().clone())
    }
}

// =============================================================================
// Voice
// =============================================================================

pub struct FakeVoice {
    pub transcript: Mutex<String>,
    pub fail: AtomicBool,
    pub transcribed: Mutex<Vec<(usize, String, Option<String>)>>,
    pub synthesized: Mutex<Vec<SpeechRequest>>,
    /// When set, transcription waits for the paired sender.
    pub gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Default for FakeVoice {
    fn default() -> Self {
        Self {
            transcript: Mutex::new("what is karma".to_string()),
            fail: AtomicBool::new(false),
            transcribed: Mutex::new(Vec::new()),
            synthesized: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }
}

impl FakeVoice {
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl VoiceService for FakeVoice {
    async fn transcribe(
        &self,
        audio: AudioClip,
        language: &str,
        user_id: Option<&str>,
    ) -> Result<Transcription> {
        self.transcribed.lock().unwrap().push((
            audio.bytes.len(),
            language.to_string(),
            user_id.map(str::to_string),
        ));
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SarathiError::Service("502: stt unavailable".to_string()));
        }
        Ok(Transcription {
            text: self.transcript.lock().unwrap().clone(),
            language: Some(language.to_string()),
        })
    }

    async fn synthesize(&self, request: SpeechRequest) -> Result<AudioClip> {
        self.synthesized.lock().unwrap().push(request);
        Ok(AudioClip::new(vec![0xAA, 0xBB], "audio/mpeg"))
    }
}

// =============================================================================
// Microphone
// =============================================================================

pub struct FakeMicrophone {
    pub permission: AtomicBool,
    pub fail_start: AtomicBool,
    pub started: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub modes: Mutex<Vec<bool>>,
    pub audio: Mutex<Vec<u8>>,
}

impl Default for FakeMicrophone {
    fn default() -> Self {
        Self {
            permission: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            modes: Mutex::new(Vec::new()),
            audio: Mutex::new(vec![1, 2, 3, 4]),
        }
    }
}

impl FakeMicrophone {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<bool> {
        self.modes.lock().unwrap().clone()
    }
}

struct FakeRecording {
    audio: Vec<u8>,
    released: Arc<AtomicUsize>,
    done: bool,
}

#[async_trait]
impl Recording for FakeRecording {
    async fn finish(&mut self) -> Result<AudioClip> {
        Ok(AudioClip::new(std::mem::take(&mut self.audio), "audio/wav"))
    }

    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn request_permission(&self) -> Result<bool> {
        Ok(self.permission.load(Ordering::SeqCst))
    }

    async fn set_recording_mode(&self, enabled: bool) -> Result<()> {
        self.modes.lock().unwrap().push(enabled);
        Ok(())
    }

    async fn start(&self) -> Result<Box<dyn Recording>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SarathiError::Recording("device busy".to_string()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecording {
            audio: self.audio.lock().unwrap().clone(),
            released: self.released.clone(),
            done: false,
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub controller: ChatController,
    pub text: Arc<ScriptedTextService>,
    pub conversations: Arc<FakeConversations>,
    pub voice: Arc<FakeVoice>,
    pub microphone: Arc<FakeMicrophone>,
    pub guest_store: GuestMessageStore,
    pub config: SarathiConfig,
}

impl Harness {
    pub fn guest() -> Self {
        Self::new(Identity::Guest)
    }

    pub fn user(id: &str) -> Self {
        Self::new(Identity::user(id))
    }

    pub fn new(identity: Identity) -> Self {
        let backing: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Self::with_store(identity, backing)
    }

    /// Build a controller over an existing key-value store.
    pub fn with_store(identity: Identity, backing: Arc<dyn KeyValueStore>) -> Self {
        let config = SarathiConfig::default();
        let text = Arc::new(ScriptedTextService::default());
        let conversations = Arc::new(FakeConversations::default());
        let voice = Arc::new(FakeVoice::default());
        let microphone = Arc::new(FakeMicrophone::default());
        let guest_store = GuestMessageStore::new(backing, &config.guest);
        let services = ChatServices {
            text: text.clone(),
            conversations: conversations.clone(),
            voice: voice.clone(),
            microphone: microphone.clone(),
        };
        let controller = ChatController::new(services, guest_store.clone(), &config, identity);
        Self {
            controller,
            text,
            conversations,
            voice,
            microphone,
            guest_store,
            config,
        }
    }

    pub fn stop_marker(&self) -> String {
        self.config.chat.stop_marker.clone()
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
