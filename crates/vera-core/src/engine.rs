//! Answer Engine seam: the external collaborator that turns a conversation
//! context into an assistant reply, whole or as a stream of increments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::VeraError;
use crate::types::Role;

pub type EngineResult<T> = Result<T, EngineError>;

/// Text increments of one answer, in order. Dropping the receiver abandons the stream.
pub type AnswerStream = mpsc::Receiver<EngineResult<String>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine timed out")]
    Timeout,
    #[error("engine request failed: {0}")]
    Http(String),
    #[error("engine returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("could not decode engine response: {0}")]
    Decode(String),
    #[error("engine misconfigured: {0}")]
    Config(String),
    #[error("engine stream interrupted: {0}")]
    Interrupted(String),
}

impl From<EngineError> for VeraError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout => VeraError::upstream_timeout(err.to_string()),
            other => VeraError::upstream_failure(other.to_string()),
        }
    }
}

/// One turn of the context handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRequest {
    pub model: String,
    pub turns: Vec<ChatTurn>,
}

/// Source reference attached to an answer by retrieval-backed engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[async_trait]
pub trait AnswerEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a complete answer for `request`.
    async fn answer(&self, request: AnswerRequest) -> EngineResult<Answer>;

    /// Produce the answer as ordered text increments.
    async fn stream(&self, request: AnswerRequest) -> EngineResult<AnswerStream>;
}
