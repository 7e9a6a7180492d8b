//! Persisted settings for the device-agent CLI.
//! Stored in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::AgentConfig;
use crate::model::ModelConfig;

/// Everything the CLI remembers between runs. Missing keys take their
/// defaults, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// OpenAI-compatible endpoint, up to and including `/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    /// Serial passed to `adb -s`; empty when only one device is attached.
    pub device_id: String,
    /// Logical display for input and capture.
    pub display_id: Option<u32>,
    /// "cn" or "en"; picks the system prompt and console messages.
    pub lang: String,
    pub max_retries: u32,
    /// Seconds between model retries.
    pub retry_delay: u64,
    pub max_steps: usize,
    /// Unparseable answers in a row before a task fails.
    pub max_parse_failures: u32,
    /// Append JSONL history under the platform data dir.
    pub record_history: bool,
    /// Keep screenshots in that history.
    pub record_images: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let model = ModelConfig::default();
        let agent = AgentConfig::default();
        Self {
            base_url: model.base_url,
            api_key: model.api_key,
            model_name: model.model_name,
            device_id: String::new(),
            display_id: None,
            lang: model.lang,
            max_retries: model.max_retries,
            retry_delay: model.retry_delay_secs,
            max_steps: agent.max_steps,
            max_parse_failures: agent.max_parse_failures,
            record_history: true,
            record_images: false,
        }
    }
}

impl AppSettings {
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "device-agent", "device-agent")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// `settings.json` inside [`config_dir`](Self::config_dir).
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, or defaults if it is missing or
    /// unreadable.
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        let mut loaded: Self = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();

        // Zero limits in older files mean "unset"
        let defaults = Self::default();
        if loaded.max_steps == 0 {
            loaded.max_steps = defaults.max_steps;
        }
        if loaded.max_parse_failures == 0 {
            loaded.max_parse_failures = defaults.max_parse_failures;
        }

        loaded
    }

    /// Write to [`settings_path`](Self::settings_path).
    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path().ok_or("Cannot determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(path, content).map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Device id, if one is pinned.
    pub fn device(&self) -> Option<String> {
        let id = self.device_id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
            .with_lang(&self.lang)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_max_steps(self.max_steps)
            .with_max_parse_failures(self.max_parse_failures)
    }
}
