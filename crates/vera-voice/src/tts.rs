//! TTS backends that turn reply text into encoded audio bytes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{VoiceError, VoiceResult};
use vera_core::SpeechConfig;

const TTS_TIMEOUT: Duration = Duration::from_secs(60);
/// OpenAI's speech endpoint rejects inputs longer than this.
const MAX_INPUT_CHARS: usize = 4096;

/// Backend that turns text into audio bytes (MP3/WAV/...). Empty output means "nothing to play".
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Returns no audio. Useful for wiring tests and keyless local runs.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// OpenAI-compatible `/audio/speech` backend.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    /// Full speech endpoint URL.
    pub url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd.
    pub model: String,
    pub voice: String,
    pub format: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        format: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(TTS_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            format: format.into(),
            client,
        })
    }

    pub fn from_config(cfg: &SpeechConfig) -> VoiceResult<Self> {
        let api_key = cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("speech requires speech.api_key (or OPENAI_API_KEY)".to_string()))?;
        Self::new(&cfg.api_url, api_key, &cfg.model, &cfg.voice, &cfg.format)
    }

    fn body(&self, text: &str) -> serde_json::Value {
        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();
        serde_json::json!({
            "model": self.model,
            "input": input,
            "voice": self.voice,
            "response_format": self.format,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.body(text))
            .send()
            .await
            .map_err(|e| VoiceError::Request(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
