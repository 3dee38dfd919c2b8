//! Voice input coordination.
//!
//! Voice input moves through a small state machine:
//! - Idle -> Recording (microphone acquired)
//! - Recording -> Transcribing (capture stopped, audio sent off)
//! - Transcribing -> Idle (transcript appended to the input, or failed)
//! - Recording -> Idle (cancel)
//!
//! The microphone is held by a [`RecordingSession`] that releases it when
//! dropped, so every exit path frees the device.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::{AudioClip, SpeechRequest, TaskId};

use crate::controller::ChatController;
use crate::session::SessionUpdate;

/// Operational state of voice input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Recording,
    Transcribing,
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceState::Idle => write!(f, "Idle"),
            VoiceState::Recording => write!(f, "Recording"),
            VoiceState::Transcribing => write!(f, "Transcribing"),
        }
    }
}

impl VoiceState {
    pub fn can_transition_to(&self, target: &VoiceState) -> bool {
        matches!(
            (self, target),
            (VoiceState::Idle, VoiceState::Recording)
                | (VoiceState::Recording, VoiceState::Transcribing)
                | (VoiceState::Transcribing, VoiceState::Idle)
                // Cancel
                | (VoiceState::Recording, VoiceState::Idle)
        )
    }

    /// Whether voice input currently excludes asking a question.
    pub fn is_busy(&self) -> bool {
        !matches!(self, VoiceState::Idle)
    }
}

/// Audio capture device.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Ask for access. `Ok(false)` means the user said no.
    async fn request_permission(&self) -> Result<bool>;

    /// Switch the platform audio mode in or out of recording.
    async fn set_recording_mode(&self, enabled: bool) -> Result<()>;

    /// Begin capturing.
    async fn start(&self) -> Result<Box<dyn Recording>>;
}

/// One capture in progress.
#[async_trait]
pub trait Recording: Send {
    /// Stop capturing and hand back the recorded audio.
    async fn finish(&mut self) -> Result<AudioClip>;

    /// Free the device. Must be safe to call more than once.
    fn release(&mut self);
}

/// Exclusive ownership of the microphone for one recording.
pub struct RecordingSession {
    task: TaskId,
    recording: Box<dyn Recording>,
    started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(task: TaskId, recording: Box<dyn Recording>) -> Self {
        Self {
            task,
            recording,
            started_at: Utc::now(),
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn elapsed_secs(&self) -> f32 {
        (Utc::now() - self.started_at).num_milliseconds() as f32 / 1000.0
    }

    /// Stop the capture. The device is released whatever the outcome.
    pub async fn finish(mut self) -> Result<AudioClip> {
        let result = self.recording.finish().await;
        tracing::debug!(
            task = %self.task,
            elapsed_secs = self.elapsed_secs(),
            ok = result.is_ok(),
            "Recording finished"
        );
        result
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.recording.release();
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("task", &self.task)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl ChatController {
    /// Acquire the microphone and begin recording.
    ///
    /// Refused while an answer is loading or voice input is already active.
    pub async fn start_voice_input(&self) -> Result<()> {
        let inner = &self.inner;
        let task = {
            let mut state = inner.lock();
            if state.loading || !state.voice.can_transition_to(&VoiceState::Recording) {
                return Err(SarathiError::VoiceBusy);
            }
            let task = TaskId(inner.next_generation());
            state.voice = VoiceState::Recording;
            state.voice_task = Some(task);
            task
        };
        inner.emit(SessionUpdate::VoiceChanged {
            state: VoiceState::Recording,
        });

        match self.acquire_microphone().await {
            Ok(recording) => {
                let session = RecordingSession::new(task, recording);
                let stale = {
                    let mut state = inner.lock();
                    if state.voice_task == Some(task) {
                        state.recording = Some(session);
                        None
                    } else {
                        Some(session)
                    }
                };
                if let Some(session) = stale {
                    // Cancelled while the device was being acquired.
                    drop(session);
                    self.reset_audio_mode().await;
                    return Err(SarathiError::Cancelled);
                }
                tracing::info!(task = %task, "Voice recording started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(task = %task, error = %e, "Could not start recording");
                self.end_voice_task(task);
                self.reset_audio_mode().await;
                Err(e)
            }
        }
    }

    async fn acquire_microphone(&self) -> Result<Box<dyn Recording>> {
        let microphone = &self.inner.services.microphone;
        if !microphone.request_permission().await? {
            return Err(SarathiError::MicrophonePermissionDenied);
        }
        microphone.set_recording_mode(true).await?;
        microphone.start().await
    }

    /// Stop recording and transcribe what was captured.
    ///
    /// The transcript is appended to the input, never submitted. Returns
    /// `Ok(None)` when the task was superseded while transcribing.
    pub async fn stop_voice_input(&self) -> Result<Option<String>> {
        let inner = &self.inner;
        let (task, session, language, user_id) = {
            let mut state = inner.lock();
            if state.voice != VoiceState::Recording {
                return Err(SarathiError::Recording("Not recording".to_string()));
            }
            let Some(session) = state.recording.take() else {
                return Err(SarathiError::Recording(
                    "Recording has not started yet".to_string(),
                ));
            };
            let task = TaskId(inner.next_generation());
            state.voice = VoiceState::Transcribing;
            state.voice_task = Some(task);
            (
                task,
                session,
                state.language.clone(),
                state.identity.user_id().map(str::to_string),
            )
        };
        inner.emit(SessionUpdate::VoiceChanged {
            state: VoiceState::Transcribing,
        });

        let captured = session.finish().await;
        self.reset_audio_mode().await;

        let transcribed = match captured {
            Ok(audio) if audio.is_empty() => Err(SarathiError::NoSpeechDetected),
            Ok(audio) => inner
                .services
                .voice
                .transcribe(audio, &language, user_id.as_deref())
                .await
                .map_err(|e| match e {
                    SarathiError::Transcription(_) => e,
                    other => SarathiError::Transcription(other.to_string()),
                }),
            Err(e) => Err(e),
        };

        let mut state = inner.lock();
        if state.voice_task != Some(task) {
            tracing::debug!(task = %task, "Dropping stale transcription");
            return Ok(None);
        }
        state.voice = VoiceState::Idle;
        state.voice_task = None;

        let result = match transcribed {
            Ok(transcription) => {
                let text = transcription.text.trim().to_string();
                if text.is_empty() {
                    Err(SarathiError::NoSpeechDetected)
                } else {
                    if state.input.trim().is_empty() {
                        state.input = text.clone();
                    } else {
                        state.input = format!("{} {}", state.input.trim_end(), text);
                    }
                    tracing::info!(task = %task, text_len = text.len(), "Voice input transcribed");
                    Ok(Some(text))
                }
            }
            Err(e) => {
                tracing::warn!(task = %task, error = %e, "Voice transcription failed");
                Err(e)
            }
        };
        drop(state);
        inner.emit(SessionUpdate::VoiceChanged {
            state: VoiceState::Idle,
        });
        result
    }

    /// Abandon voice input, releasing the microphone and discarding any
    /// pending transcription.
    pub async fn cancel_voice_input(&self) {
        let (was_active, session) = {
            let mut state = self.inner.lock();
            let was_active = state.voice.is_busy();
            state.voice = VoiceState::Idle;
            state.voice_task = None;
            (was_active, state.recording.take())
        };
        if !was_active {
            return;
        }
        drop(session);
        self.reset_audio_mode().await;
        tracing::info!("Voice input cancelled");
        self.inner.emit(SessionUpdate::VoiceChanged {
            state: VoiceState::Idle,
        });
    }

    /// Synthesize speech for a finished message.
    pub async fn read_aloud(&self, message_id: &str) -> Result<AudioClip> {
        let request = {
            let state = self.inner.lock();
            let message = state
                .messages
                .iter()
                .find(|m| m.id == message_id && !m.is_streaming)
                .ok_or_else(|| SarathiError::MessageNotFound(message_id.to_string()))?;
            SpeechRequest {
                text: message.content.clone(),
                language: state.language.clone(),
                voice: self.inner.voice.tts_voice.clone(),
                speed: self.inner.voice.tts_speed,
            }
        };
        self.inner.services.voice.synthesize(request).await
    }

    fn end_voice_task(&self, task: TaskId) {
        let mut state = self.inner.lock();
        if state.voice_task != Some(task) {
            return;
        }
        state.voice = VoiceState::Idle;
        state.voice_task = None;
        state.recording = None;
        drop(state);
        self.inner.emit(SessionUpdate::VoiceChanged {
            state: VoiceState::Idle,
        });
    }

    async fn reset_audio_mode(&self) {
        if let Err(e) = self.inner.services.microphone.set_recording_mode(false).await {
            tracing::warn!(error = %e, "Failed to reset audio mode");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
