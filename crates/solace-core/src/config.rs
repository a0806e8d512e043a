use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{ChatMode, ResponseStyle};

/// Top-level configuration for the Solace engine.
///
/// Loaded from `~/.solace/config.toml` by default. Each section corresponds
/// to one subsystem; absent sections fall back to defaults so a partial file
/// is always valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolaceConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl Default for SolaceConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            chat: ChatConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

impl SolaceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SolaceConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
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

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Path of the conversation database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.general.data_dir).join("solace.db")
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite conversation store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.solace/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Chat session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Conversation id joined when none is supplied.
    pub conversation_id: String,
    /// Free exchanges allowed before a guest must sign in.
    pub guest_limit: u32,
    /// Messages rehydrated from the store on startup.
    pub history_limit: usize,
    /// BCP-47-ish language tag sent with every inference request.
    pub language: String,
    pub mode: ChatMode,
    pub style: ResponseStyle,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            conversation_id: crate::types::DEFAULT_CONVERSATION.to_string(),
            guest_limit: 5,
            history_limit: 50,
            language: "en".to_string(),
            mode: ChatMode::Text,
            style: ResponseStyle::Balanced,
        }
    }
}

/// Voice loop settings: synthesis profile plus VAD tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Language passed to transcription and synthesis.
    pub language: String,
    /// Synthesis voice profile; `None` uses the platform default.
    pub voice: Option<String>,
    /// Playback rate multiplier.
    pub rate: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Energy level (dB) above which a sample counts as speech.
    pub silence_threshold_db: f32,
    /// Silence required before an utterance is considered complete.
    pub silence_duration_ms: u64,
    /// Interval between capture metering samples.
    pub frame_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            silence_threshold_db: -40.0,
            silence_duration_ms: 1500,
            frame_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SolaceConfig::default();
        assert_eq!(config.general.data_dir, "~/.solace/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.chat.conversation_id, "default");
        assert_eq!(config.chat.guest_limit, 5);
        assert_eq!(config.chat.history_limit, 50);
        assert_eq!(config.voice.silence_threshold_db, -40.0);
        assert_eq!(config.voice.silence_duration_ms, 1500);
        assert_eq!(config.voice.frame_ms, 50);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[chat]
conversation_id = "journal"
guest_limit = 3
history_limit = 20
language = "de"
mode = "voice"
style = "supportive"

[voice]
language = "de-DE"
rate = 1.2
silence_threshold_db = -35.0
"#;
        let file = create_temp_config(content);
        let config = SolaceConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.chat.guest_limit, 3);
        assert_eq!(config.chat.mode, ChatMode::Voice);
        assert_eq!(config.chat.style, ResponseStyle::Supportive);
        assert_eq!(config.voice.rate, 1.2);
        assert_eq!(config.voice.silence_threshold_db, -35.0);
        // Unspecified voice fields keep their defaults.
        assert_eq!(config.voice.silence_duration_ms, 1500);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = SolaceConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.chat.guest_limit, 5);
        assert_eq!(config.voice.silence_threshold_db, -40.0);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SolaceConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.solace/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = SolaceConfig::default();
        config.chat.guest_limit = 10;
        config.voice.voice = Some("calm-female-1".to_string());
        config.save(&path).unwrap();

        let reloaded = SolaceConfig::load(&path).unwrap();
        assert_eq!(reloaded.chat.guest_limit, 10);
        assert_eq!(reloaded.voice.voice.as_deref(), Some("calm-female-1"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SolaceConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: SolaceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.chat.history_limit, config.chat.history_limit);
        assert_eq!(
            deserialized.voice.silence_duration_ms,
            config.voice.silence_duration_ms
        );
    }

    #[test]
    fn test_db_path_joins_data_dir() {
        let mut config = SolaceConfig::default();
        config.general.data_dir = "/tmp/solace-test".to_string();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/solace-test/solace.db"));
    }
}
