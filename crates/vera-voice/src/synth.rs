//! Persists synthesized clips under the audio directory and hands back their URL.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::VoiceResult;
use crate::tts::TtsBackend;
use vera_core::{AudioArtifact, SpeechError, SpeechResult, SpeechSynthesizer};

/// URL prefix the gateway serves the audio directory under.
pub const AUDIO_URL_PREFIX: &str = "/audio";

pub struct FileSynthesizer {
    backend: Arc<dyn TtsBackend>,
    audio_dir: PathBuf,
    extension: String,
}

fn mime_for(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}

impl FileSynthesizer {
    pub fn new(backend: Arc<dyn TtsBackend>, audio_dir: impl Into<PathBuf>, format: &str) -> VoiceResult<Self> {
        let audio_dir = audio_dir.into();
        std::fs::create_dir_all(&audio_dir)?;
        let extension = match format.trim().to_ascii_lowercase() {
            f if f.is_empty() => "mp3".to_string(),
            f => f,
        };
        Ok(Self {
            backend,
            audio_dir,
            extension,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for FileSynthesizer {
    async fn synthesize(&self, text: &str) -> SpeechResult<AudioArtifact> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }
        let bytes = self.backend.synthesize(text).await?;
        if bytes.is_empty() {
            return Err(SpeechError::Disabled);
        }
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), self.extension);
        let path = self.audio_dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(target: "vera::voice", file = %path.display(), bytes = bytes.len(), "Audio clip written");
        Ok(AudioArtifact {
            url: format!("{}/{}", AUDIO_URL_PREFIX, file_name),
            bytes,
            mime_type: mime_for(&self.extension).to_string(),
        })
    }
}
