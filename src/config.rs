use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Client configuration for the Flora assistant backend and the realtime
/// speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
}

/// Backend REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Flora backend.
    pub base_url: String,
    /// Bearer token for authenticated requests, if the user is signed in.
    pub access_token: Option<String>,
}

/// Realtime speech-model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the speech model.
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Extra system instructions for the voice persona.
    pub instructions: Option<String>,
}

/// Audio capture/playback formats negotiated with the speech model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Preferred capture sample rate in Hz.
    pub sample_rate: u32,
    pub input_format: String,
    pub output_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "https://api.floragarden.app/v1".to_string(),
                access_token: None,
            },
            realtime: RealtimeConfig {
                endpoint: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "alloy".to_string(),
                instructions: None,
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                input_format: "pcm16".to_string(),
                output_format: "pcm16".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(default_config_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = path.unwrap_or_else(default_config_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

fn default_config_path() -> PathBuf {
    let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home_dir.join(".floratalk").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(dir.path().join("config.toml"))).unwrap();
        assert_eq!(config.audio.input_format, "pcm16");
        assert!(config.api.access_token.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.api.base_url = "https://staging.floragarden.app/v1".to_string();
        config.realtime.voice = "sage".to_string();
        config.save(Some(path.clone())).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.api.base_url, "https://staging.floragarden.app/v1");
        assert_eq!(loaded.realtime.voice, "sage");
    }
}
