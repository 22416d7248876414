use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // LLM configuration (OpenAI-compatible Responses API)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Display name the assistant's messages are attributed to.
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// How many recent messages form the conversation window per send.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Upper bound on one completion-service call, in seconds.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_llm_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_assistant_name() -> String {
    "ChatGPT".to_string()
}

fn default_history_window() -> usize {
    50
}

fn default_completion_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> String {
    "parlor.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            assistant_name: default_assistant_name(),
            history_window: default_history_window(),
            completion_timeout_secs: default_completion_timeout_secs(),
            database_path: default_database_path(),
        }
    }
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("parlor_config.toml")
    }

    /// Load config from parlor_config.toml next to the executable, falling
    /// back to environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("OPENAI_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("OPENAI_MODEL") {
            config.llm_model = model;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.llm_api_key = Some(key);
            }
        }

        if let Ok(name) = env::var("PARLOR_ASSISTANT_NAME") {
            if !name.trim().is_empty() {
                config.assistant_name = name;
            }
        }

        if let Ok(window) = env::var("PARLOR_HISTORY_WINDOW") {
            if let Ok(size) = window.parse() {
                config.history_window = size;
            }
        }

        if let Ok(timeout) = env::var("PARLOR_COMPLETION_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                config.completion_timeout_secs = seconds;
            }
        }

        if let Ok(path) = env::var("PARLOR_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        config
    }
}
