//! Answer engines: a live OpenAI-compatible router and a deterministic mock.

mod mock;
mod router;
mod sse;

pub use mock::MockEngine;
pub use router::ModelRouter;
pub use sse::{SseDecoder, SseEvent};

use std::sync::Arc;
use vera_core::{AnswerEngine, EngineConfig, EngineMode, EngineResult};

/// Build the engine selected by `cfg.mode`.
pub fn engine_from_config(cfg: &EngineConfig) -> EngineResult<Arc<dyn AnswerEngine>> {
    match cfg.mode {
        EngineMode::Mock => {
            tracing::info!(target: "vera::engine", "Using mock answer engine");
            Ok(Arc::new(MockEngine::default()))
        }
        EngineMode::Live => {
            let router = ModelRouter::new(cfg.clone())?;
            tracing::info!(
                target: "vera::engine",
                provider = %cfg.provider,
                url = %cfg.api_url,
                streaming = cfg.streaming,
                "Using live answer engine"
            );
            Ok(Arc::new(router))
        }
    }
}
