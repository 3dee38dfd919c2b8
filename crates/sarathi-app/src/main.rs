//! Sarathi terminal client - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the guest history database
//! 3. Build the HTTP service clients and the chat controller
//! 4. Restore the guest session or sign in the configured user
//! 5. Run the renderer and the input loop until exit

mod cli;
mod microphone;
mod render;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use sarathi_chat::{ChatController, ChatServices};
use sarathi_core::config::SarathiConfig;
use sarathi_core::types::Identity;
use sarathi_remote::{HttpBackend, HttpConversationService, HttpTextStream, HttpVoiceService};
use sarathi_storage::{GuestMessageStore, SqliteStore};

use cli::CliArgs;
use microphone::FileMicrophone;
use repl::Repl;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = SarathiConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // Tracing goes to stderr so answers on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Sarathi v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("guest.db");
    let kv = SqliteStore::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Guest store opened");
    let guest_store = GuestMessageStore::new(Arc::new(kv), &config.guest);

    // Remote services share one HTTP client.
    let backend = HttpBackend::from_config(&config.backend)?;
    tracing::info!(url = %backend.base_url(), "Backend configured");
    let services = ChatServices {
        text: Arc::new(HttpTextStream::new(backend.clone())),
        conversations: Arc::new(HttpConversationService::new(backend.clone())),
        voice: Arc::new(HttpVoiceService::new(backend)),
        microphone: Arc::new(FileMicrophone::new(args.audio_file.clone())),
    };

    let controller = ChatController::new(services, guest_store, &config, Identity::Guest);
    let renderer = tokio::spawn(render::render_updates(
        controller.clone(),
        controller.subscribe(),
    ));

    match config.backend.user_id.clone() {
        // Signing in moves any leftover guest history to the account.
        Some(user_id) => controller.set_identity(Identity::user(user_id)).await,
        None => {
            let restored = controller.restore_guest_session();
            if restored > 0 {
                tracing::info!(messages = restored, "Guest session restored");
            }
        }
    }

    Repl::new(controller.clone(), data_dir).run().await;

    controller.shutdown().await;
    drop(controller);
    renderer.abort();
    tracing::info!("Sarathi stopped");
    Ok(())
}
