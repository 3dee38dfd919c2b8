//! Prints session updates to the terminal as they arrive.

use std::collections::HashMap;
use std::io::Write;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use sarathi_chat::{ChatController, SessionUpdate, VoiceState};
use sarathi_core::types::{ChatMessage, Role, Source};

/// One line per citation, e.g. `  [BG 2.47] 0.90 You have a right...`.
pub fn format_sources(sources: &[Source]) -> Vec<String> {
    sources
        .iter()
        .map(|s| {
            let text: String = s.text.chars().take(80).collect();
            format!("  [{}] {:.2} {}", s.verse, s.score, text)
        })
        .collect()
}

pub fn format_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!("> {}", m.content),
            Role::Assistant => m.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render until the controller goes away.
pub async fn render_updates(controller: ChatController, mut updates: Receiver<SessionUpdate>) {
    // Bytes of each streaming message already on screen.
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut out = std::io::stdout();

    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Renderer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match update {
            SessionUpdate::MessageAppended { id } => {
                let view = controller.snapshot();
                if let Some(message) = view.messages.iter().find(|m| m.id == id) {
                    if message.role == Role::Assistant && message.is_streaming {
                        printed.insert(id, 0);
                    }
                }
            }
            SessionUpdate::ContentDelta { id, token } => {
                let _ = write!(out, "{}", token);
                let _ = out.flush();
                *printed.entry(id).or_insert(0) += token.len();
            }
            SessionUpdate::MessageFinalized { id } => {
                let shown = printed.remove(&id).unwrap_or(0);
                let view = controller.snapshot();
                let Some(message) = view.messages.iter().find(|m| m.id == id) else {
                    continue;
                };
                let rest = message.content.get(shown..).unwrap_or("");
                let _ = writeln!(out, "{}", rest);
                for line in format_sources(&message.sources) {
                    let _ = writeln!(out, "{}", line);
                }
                for question in &message.follow_ups {
                    let _ = writeln!(out, "  ? {}", question);
                }
                let _ = out.flush();
            }
            SessionUpdate::SessionReplaced => {
                printed.clear();
                let view = controller.snapshot();
                if !view.messages.is_empty() {
                    let _ = writeln!(out, "{}", format_transcript(&view.messages));
                }
            }
            SessionUpdate::VoiceChanged { state } => {
                let label = match state {
                    VoiceState::Recording => "[recording]",
                    VoiceState::Transcribing => "[transcribing]",
                    VoiceState::Idle => "[voice idle]",
                };
                let _ = writeln!(out, "{}", label);
            }
            SessionUpdate::MessageUpdated { .. } | SessionUpdate::ConversationsUpdated => {}
        }
    }
}
