//! Speech output for Vera: text-to-speech backends and a synthesizer that
//! stores each clip in the audio directory served under `/audio`.

pub mod error;
mod synth;
mod tts;

pub use error::{VoiceError, VoiceResult};
pub use synth::FileSynthesizer;
pub use tts::{OpenAiTts, PlaceholderTts, TtsBackend};

use std::sync::Arc;
use vera_core::{SpeechConfig, SpeechSynthesizer};

/// Build the synthesizer described by `cfg`, or `None` when speech is disabled.
pub fn synthesizer_from_config(
    cfg: &SpeechConfig,
    audio_dir: impl Into<std::path::PathBuf>,
) -> VoiceResult<Option<Arc<dyn SpeechSynthesizer>>> {
    if !cfg.enabled {
        tracing::info!(target: "vera::voice", "Speech synthesis disabled");
        return Ok(None);
    }
    let backend = OpenAiTts::from_config(cfg)?;
    let synth = FileSynthesizer::new(Arc::new(backend), audio_dir, &cfg.format)?;
    tracing::info!(target: "vera::voice", model = %cfg.model, voice = %cfg.voice, "Speech synthesis enabled");
    Ok(Some(Arc::new(synth)))
}
