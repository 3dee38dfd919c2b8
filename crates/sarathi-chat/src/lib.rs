//! Sarathi chat: the session controller behind every front end.
//!
//! [`ChatController`] owns the visible conversation, drives the answer
//! stream, persists turns for signed-in users, keeps the guest history,
//! migrates it on login and coordinates voice input.

pub mod context;
pub mod controller;
pub mod migration;
pub mod session;
pub mod voice;

pub use controller::{ChatController, ChatServices, StreamOutcome};
pub use migration::MigrationOutcome;
pub use session::{Finish, SessionUpdate, SessionView};
pub use voice::{Microphone, Recording, RecordingSession, VoiceState};
