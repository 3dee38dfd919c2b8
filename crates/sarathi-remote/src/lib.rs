//! Sarathi remote: contracts and HTTP clients for the answering,
//! conversation-persistence and speech services.

pub mod client;
pub mod conversations;
pub mod services;
pub mod text;
pub mod voice;

pub use client::HttpBackend;
pub use conversations::HttpConversationService;
pub use services::{
    AnswerRequest, ConversationService, EventStream, TextStreamService, VoiceService,
};
pub use text::HttpTextStream;
pub use voice::HttpVoiceService;

/// Re-exported so callers need not depend on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
