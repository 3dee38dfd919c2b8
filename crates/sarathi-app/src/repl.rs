//! Line-oriented chat loop.
//!
//! Plain lines are questions; lines starting with `/` are commands.
//! Questions run on their own task so `/stop` and Ctrl-C stay responsive
//! while an answer streams.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use sarathi_chat::ChatController;
use sarathi_core::types::{Identity, Role};

use crate::microphone::extension_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    New,
    Stop,
    List,
    Load(String),
    Delete(String),
    Lang(Option<String>),
    Login(String),
    Logout,
    Record,
    Send,
    Speak(Option<String>),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Ask(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    match (name, arg) {
        ("new", _) => Command::New,
        ("stop", _) => Command::Stop,
        ("list" | "ls", _) => Command::List,
        ("load", Some(id)) => Command::Load(id),
        ("delete" | "rm", Some(id)) => Command::Delete(id),
        ("lang", arg) => Command::Lang(arg),
        ("login", Some(id)) => Command::Login(id),
        ("logout", _) => Command::Logout,
        ("rec" | "record", _) => Command::Record,
        ("send", _) => Command::Send,
        ("speak", arg) => Command::Speak(arg),
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit" | "q", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
Type a question and press enter.
  /new            start a new chat
  /stop           stop the current answer
  /list           list saved conversations
  /load <n|id>    open a saved conversation
  /delete <n|id>  delete a saved conversation
  /lang [code]    show or set the answer language
  /login <id>     sign in (guest history moves to your account)
  /logout         sign out
  /rec            start or stop voice input
  /send           ask the question in the input buffer
  /speak [id]     synthesize the last answer (or message id) to a file
  /quit           exit";

pub struct Repl {
    controller: ChatController,
    data_dir: PathBuf,
}

impl Repl {
    pub fn new(controller: ChatController, data_dir: PathBuf) -> Self {
        Self {
            controller,
            data_dir,
        }
    }

    pub async fn run(&self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Ask a question, or /help for commands.");

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => {
                    if self.controller.snapshot().is_loading {
                        self.controller.stop_streaming();
                        continue;
                    }
                    break;
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read input");
                    break;
                }
            };

            if !self.dispatch(parse_command(&line)).await {
                break;
            }
        }
    }

    /// Handle one command. Returns `false` when the loop should end.
    async fn dispatch(&self, command: Command) -> bool {
        let controller = &self.controller;
        match command {
            Command::Empty => {}
            Command::Ask(question) => self.ask(question),
            Command::Send => self.ask(controller.input()),
            Command::New => controller.start_new_chat().await,
            Command::Stop => {
                if !controller.stop_streaming() {
                    println!("Nothing to stop.");
                }
            }
            Command::List => {
                controller.refresh_conversations().await;
                let view = controller.snapshot();
                if view.conversations.is_empty() {
                    println!("No saved conversations.");
                }
                for (i, c) in view.conversations.iter().enumerate() {
                    let marker = if view.link.id() == Some(c.id.as_str()) { "*" } else { " " };
                    println!("{}{:>3}. {} ({})", marker, i + 1, c.title, c.id);
                }
            }
            Command::Load(target) => {
                let id = self.conversation_id(&target);
                if !controller.load_conversation(&id).await {
                    println!("Could not load conversation {}.", id);
                }
            }
            Command::Delete(target) => {
                let id = self.conversation_id(&target);
                if controller.delete_conversation(&id).await {
                    println!("Deleted {}.", id);
                } else {
                    println!("Could not delete conversation {}.", id);
                }
            }
            Command::Lang(None) => println!("Language: {}", controller.language()),
            Command::Lang(Some(code)) => {
                controller.set_language(code.clone());
                println!("Language set to {}.", code);
            }
            Command::Login(id) => {
                controller.set_identity(Identity::user(id.clone())).await;
                println!("Signed in as {}.", id);
            }
            Command::Logout => {
                controller.set_identity(Identity::Guest).await;
                println!("Signed out.");
            }
            Command::Record => self.toggle_recording().await,
            Command::Speak(id) => self.speak(id).await,
            Command::Help => println!("{}", HELP),
            Command::Unknown(line) => println!("Unknown command: {} (try /help)", line),
            Command::Quit => return false,
        }
        true
    }

    fn ask(&self, question: String) {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            match controller.submit_question(&question).await {
                Ok(outcome) => tracing::debug!(?outcome, "Question finished"),
                Err(e) => println!("{}", e),
            }
        });
    }

    async fn toggle_recording(&self) {
        let controller = &self.controller;
        if controller.snapshot().is_recording() {
            match controller.stop_voice_input().await {
                Ok(Some(text)) => {
                    println!("Heard: {}", text);
                    println!("Input: {} (/send to ask)", controller.input());
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        } else {
            match controller.start_voice_input().await {
                Ok(()) => println!("Recording... /rec again to stop."),
                Err(e) => println!("{}", e),
            }
        }
    }

    async fn speak(&self, id: Option<String>) {
        let id = match id {
            Some(id) => id,
            None => {
                let view = self.controller.snapshot();
                match view
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant && !m.is_streaming)
                {
                    Some(m) => m.id.clone(),
                    None => {
                        println!("No answer to read aloud.");
                        return;
                    }
                }
            }
        };

        let clip = match self.controller.read_aloud(&id).await {
            Ok(clip) => clip,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };
        let path = self
            .data_dir
            .join(format!("reply.{}", extension_for(&clip.mime_type)));
        match tokio::fs::write(&path, &clip.bytes).await {
            Ok(()) => println!("Saved speech to {}", path.display()),
            Err(e) => println!("Could not save speech: {}", e),
        }
    }

    /// Accept either a 1-based list index or a raw conversation id.
    fn conversation_id(&self, target: &str) -> String {
        if let Ok(n) = target.parse::<usize>() {
            let view = self.controller.snapshot();
            if let Some(c) = n.checked_sub(1).and_then(|i| view.conversations.get(i)) {
                return c.id.clone();
            }
        }
        target.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_question() {
        assert_eq!(
            parse_command("  What is dharma?  "),
            Command::Ask("What is dharma?".into())
        );
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse_command("/load 2"), Command::Load("2".into()));
        assert_eq!(parse_command("/rm c7"), Command::Delete("c7".into()));
        assert_eq!(parse_command("/login  alice "), Command::Login("alice".into()));
        assert_eq!(parse_command("/lang"), Command::Lang(None));
        assert_eq!(parse_command("/lang hi"), Command::Lang(Some("hi".into())));
        assert_eq!(parse_command("/speak"), Command::Speak(None));
    }

    #[test]
    fn test_missing_argument_is_unknown() {
        assert_eq!(parse_command("/load"), Command::Unknown("/load".into()));
        assert_eq!(parse_command("/login"), Command::Unknown("/login".into()));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(parse_command("/q"), Command::Quit);
        assert_eq!(parse_command("/exit"), Command::Quit);
        assert_eq!(parse_command("/record"), Command::Record);
        assert_eq!(parse_command("/ls"), Command::List);
        assert_eq!(parse_command("/?"), Command::Help);
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse_command("/dance"), Command::Unknown("/dance".into()));
    }
}
