//! Speech Synthesizer seam. Synthesis is always best-effort for callers.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub type SpeechResult<T> = Result<T, SpeechError>;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("speech synthesis disabled")]
    Disabled,
    #[error("speech request failed: {0}")]
    Http(String),
    #[error("speech provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("speech io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("nothing to synthesize")]
    EmptyText,
}

/// A synthesized clip: where it is served from plus the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub url: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioArtifact {
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> SpeechResult<AudioArtifact>;
}
