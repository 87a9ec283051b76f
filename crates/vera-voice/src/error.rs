//! Error types for speech synthesis

use thiserror::Error;
use vera_core::SpeechError;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TTS request error: {0}")]
    Request(String),

    #[error("TTS API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VoiceError> for SpeechError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Config(m) => SpeechError::Http(format!("misconfigured: {}", m)),
            VoiceError::Request(m) => SpeechError::Http(m),
            VoiceError::Api { status, body } => SpeechError::Api { status, body },
            VoiceError::Io(e) => SpeechError::Io(e),
        }
    }
}
