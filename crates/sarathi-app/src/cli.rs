//! CLI argument definitions for the `sarathi` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use sarathi_core::config::SarathiConfig;

/// Sarathi: ask questions and get scripture-grounded answers in the terminal.
#[derive(Parser, Debug)]
#[command(name = "sarathi", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Base URL of the backend API.
    #[arg(short = 'b', long = "backend-url")]
    pub backend_url: Option<String>,

    /// Start signed in as this user.
    #[arg(short = 'u', long = "user-id")]
    pub user_id: Option<String>,

    /// Answer language code.
    #[arg(short = 'L', long = "language")]
    pub language: Option<String>,

    /// Data directory for the guest history database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Audio file played back as the microphone for voice input.
    #[arg(long = "audio-file")]
    pub audio_file: Option<PathBuf>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SARATHI_CONFIG env var > ~/.sarathi/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SARATHI_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the backend URL.
    ///
    /// Priority: --backend-url flag > SARATHI_BACKEND_URL env var > config file value.
    pub fn resolve_backend_url(&self, config_url: &str) -> String {
        if let Some(ref url) = self.backend_url {
            return url.clone();
        }
        if let Ok(url) = std::env::var("SARATHI_BACKEND_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        config_url.to_string()
    }

    /// Resolve the signed-in user.
    ///
    /// Priority: --user-id flag > SARATHI_USER_ID env var > config file value.
    pub fn resolve_user_id(&self, config_user: Option<&str>) -> Option<String> {
        if let Some(ref id) = self.user_id {
            return Some(id.clone());
        }
        if let Ok(id) = std::env::var("SARATHI_USER_ID") {
            if !id.is_empty() {
                return Some(id);
            }
        }
        config_user.map(str::to_string)
    }

    /// Resolve the answer language.
    ///
    /// Priority: --language flag > SARATHI_LANGUAGE env var > config file value.
    pub fn resolve_language(&self, config_language: &str) -> String {
        if let Some(ref lang) = self.language {
            return lang.clone();
        }
        if let Ok(lang) = std::env::var("SARATHI_LANGUAGE") {
            if !lang.is_empty() {
                return lang;
            }
        }
        config_language.to_string()
    }

    /// Resolve the data directory. `None` keeps the config value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level. `None` keeps the config value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Fold every override into the loaded configuration.
    pub fn apply(&self, config: &mut SarathiConfig) {
        config.backend.base_url = self.resolve_backend_url(&config.backend.base_url);
        config.backend.user_id = self.resolve_user_id(config.backend.user_id.as_deref());
        config.general.default_language = self.resolve_language(&config.general.default_language);
        if let Some(dir) = self.resolve_data_dir() {
            config.general.data_dir = dir;
        }
        if let Some(level) = self.resolve_log_level() {
            config.general.log_level = level;
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".sarathi").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".sarathi").join("config.toml");
    }
    PathBuf::from("config.toml")
}
