//! Typed configuration. Precedence: env `VERA__*` > TOML file (`VERA_CONFIG`,
//! default `config/gateway.toml`) > built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_CONFIG_PATH: &str = "VERA_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";
const MIN_SECRET_LEN: usize = 16;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are VERA, a nurse educator with a warm, grandmotherly style who answers \
questions about peripheral artery disease (P.A.D.). Use the provided context as your fact basis. Keep answers \
accurate and at a 5th grade reading level: short sentences, simple words, everyday comparisons (narrowed arteries \
are like a pinched garden hose). Do not encourage self-diagnosis or medication changes; suggest a general medicine \
provider for personal medical decisions.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Directory synthesized audio is written to and served from under `/audio`.
    pub audio_dir: String,
    pub database_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "VERA PAD Chat API".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            audio_dir: "static/audio".to_string(),
            database_path: "data/vera.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret_key: String,
    pub token_ttl_minutes: u64,
    /// Admin routes are disabled when unset.
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            token_ttl_minutes: 24 * 60,
            admin_password: None,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_ttl_minutes.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    /// Most recent messages forwarded to the engine.
    pub context_window: usize,
    pub max_content_chars: usize,
    pub max_history_limit: usize,
    pub engine_timeout_secs: u64,
    pub default_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_window: 50,
            max_content_chars: crate::ledger::DEFAULT_MAX_CONTENT_CHARS,
            max_history_limit: crate::ledger::DEFAULT_MAX_HISTORY_LIMIT,
            engine_timeout_secs: 60,
            default_model: "gpt-4o".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Mock returns canned text; live calls the configured HTTP API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Mock,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: String,
    pub mode: EngineMode,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub streaming: bool,
    /// Retrieval parameters forwarded opaquely to retrieval-backed engines.
    pub vector_store_path: Option<String>,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            mode: EngineMode::Mock,
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.5,
            max_tokens: 1000,
            streaming: true,
            vector_store_path: None,
            chunk_size: 2000,
            chunk_overlap: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub format: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.openai.com/v1/audio/speech".to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
        }
    }
}

/// Global application configuration for the gateway and its collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub engine: EngineConfig,
    pub speech: SpeechConfig,
}

impl CoreConfig {
    /// Load from file and environment, then apply legacy variable fallbacks
    /// (`SECRET_KEY`, `ADMIN_PASSWORD`, `OPENAI_API_KEY`, `OPENROUTER_API_KEY`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let builder = config::Config::builder();

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("VERA")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .build()?;

        let mut cfg: CoreConfig = built.try_deserialize()?;
        cfg.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if self.auth.secret_key.trim().is_empty() {
            if let Some(v) = non_empty("SECRET_KEY") {
                self.auth.secret_key = v;
            }
        }
        if self.auth.admin_password.is_none() {
            self.auth.admin_password = non_empty("ADMIN_PASSWORD");
        }
        if self.engine.api_key.is_none() {
            self.engine.api_key = non_empty("OPENAI_API_KEY").or_else(|| non_empty("OPENROUTER_API_KEY"));
        }
        if self.speech.api_key.is_none() {
            self.speech.api_key = self.engine.api_key.clone();
        }
    }

    /// Reject configurations the service must not start with.
    pub fn validate(&self) -> Result<(), String> {
        let secret = self.auth.secret_key.trim();
        if secret.is_empty() {
            return Err("auth.secret_key is not set (VERA__AUTH__SECRET_KEY or SECRET_KEY)".to_string());
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(format!("auth.secret_key must be at least {} bytes", MIN_SECRET_LEN));
        }
        if self.chat.context_window == 0 {
            return Err("chat.context_window must be positive".to_string());
        }
        if self.engine.mode == EngineMode::Live && self.engine.api_key.is_none() {
            return Err("engine.mode = live requires engine.api_key (or OPENAI_API_KEY)".to_string());
        }
        Ok(())
    }
}
