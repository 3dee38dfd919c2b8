use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SarathiError};

/// Top-level configuration for the Sarathi client.
///
/// Loaded from `~/.sarathi/config.toml` by default. Every section falls
/// back to its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SarathiConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub guest: GuestConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl SarathiConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SarathiConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SarathiError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the guest store database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Answer language selected at startup.
    pub default_language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.sarathi/data".to_string(),
            log_level: "info".to_string(),
            default_language: "en".to_string(),
        }
    }
}

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend origin, e.g. "https://api.example.org". Empty means unset.
    pub base_url: String,
    /// Per-request timeout for non-streaming calls.
    pub request_timeout_secs: u64,
    /// Signed-in user at startup, if any.
    pub user_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: 25,
            user_id: None,
        }
    }
}

/// Chat session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Characters of the first question used as the conversation title.
    pub title_max_chars: usize,
    /// Recent turns requested from the server context bundle.
    pub context_message_count: usize,
    /// In-memory messages summarised when the server context is unavailable.
    pub local_context_messages: usize,
    /// Per-message truncation for the local summary.
    pub local_context_chars: usize,
    /// Appended to an answer stopped before completion.
    pub stop_marker: String,
    /// Prefix of an inline stream error.
    pub error_marker: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_max_chars: 64,
            context_message_count: 6,
            local_context_messages: 8,
            local_context_chars: 200,
            stop_marker: " [stopped]".to_string(),
            error_marker: "⚠️".to_string(),
        }
    }
}

/// Guest history persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Key under which the guest history is stored.
    pub storage_key: String,
    /// Newest messages retained; older ones are discarded first.
    pub max_messages: usize,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            storage_key: "guest_chat_messages".to_string(),
            max_messages: 50,
        }
    }
}

/// Speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Voice used for read-aloud.
    pub tts_voice: String,
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tts_voice: "default".to_string(),
            tts_speed: 1.0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
