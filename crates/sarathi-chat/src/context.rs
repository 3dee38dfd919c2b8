//! Conversation context sent along with each question.
//!
//! Prefers the server's memory bundle (long-term summary plus recent turns);
//! falls back to a rolling window over the in-memory messages.

use sarathi_core::types::{ChatMessage, ContextBundle, Role};

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head.trim_end())
}

/// Summary of the last `window` messages, each clipped to `max_chars`.
///
/// Empty messages are skipped. Returns an empty string when there is no
/// history.
pub fn local_summary<'a, I>(messages: I, window: usize, max_chars: usize) -> String
where
    I: IntoIterator<Item = &'a ChatMessage>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut recent: Vec<&ChatMessage> = messages
        .into_iter()
        .rev()
        .filter(|m| !m.content.trim().is_empty())
        .take(window)
        .collect();
    recent.reverse();

    recent
        .iter()
        .map(|m| format!("{}: {}", label(m.role), clip(&m.content, max_chars)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a server memory bundle. Returns `None` when the bundle is empty.
pub fn from_bundle(bundle: &ContextBundle, max_chars: usize) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(summary) = bundle.summary.as_deref().map(str::trim) {
        if !summary.is_empty() {
            lines.push(format!("Summary: {}", summary));
        }
    }
    for turn in &bundle.recent {
        if turn.content.trim().is_empty() {
            continue;
        }
        lines.push(format!("{}: {}", label(turn.role), clip(&turn.content, max_chars)));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sarathi_core::types::ContextTurn;

    fn history(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_local_summary_empty() {
        assert_eq!(local_summary(&Vec::<ChatMessage>::new(), 8, 200), "");
    }

    #[test]
    fn test_local_summary_keeps_last_window_in_order() {
        let msgs = history(12);
        let summary = local_summary(&msgs, 8, 200);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "User: q4");
        assert_eq!(lines[7], "Assistant: a11");
    }

    #[test]
    fn test_local_summary_clips_long_messages() {
        let msgs = vec![ChatMessage::user("x".repeat(500))];
        let summary = local_summary(&msgs, 8, 10);
        assert_eq!(summary, format!("User: {}...", "x".repeat(10)));
    }

    #[test]
    fn test_local_summary_skips_empty_messages() {
        let msgs = vec![ChatMessage::user("q"), ChatMessage::assistant("   ")];
        assert_eq!(local_summary(&msgs, 8, 200), "User: q");
    }

    #[test]
    fn test_from_bundle_renders_summary_and_turns() {
        let bundle = ContextBundle {
            summary: Some("Seeker asked about duty.".into()),
            recent: vec![
                ContextTurn {
                    role: Role::User,
                    content: "What is dharma?".into(),
                },
                ContextTurn {
                    role: Role::Assistant,
                    content: "Dharma is duty.".into(),
                },
            ],
        };
        let text = from_bundle(&bundle, 200).unwrap();
        assert_eq!(
            text,
            "Summary: Seeker asked about duty.\nUser: What is dharma?\nAssistant: Dharma is duty."
        );
    }

    #[test]
    fn test_from_bundle_empty_is_none() {
        assert!(from_bundle(&ContextBundle::default(), 200).is_none());
        let blank = ContextBundle {
            summary: Some("  ".into()),
            recent: vec![],
        };
        assert!(from_bundle(&blank, 200).is_none());
    }
}
