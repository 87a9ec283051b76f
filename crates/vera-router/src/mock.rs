//! Mock engine: deterministic replies, streamed word by word.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use vera_core::{Answer, AnswerEngine, AnswerRequest, AnswerStream, EngineResult, Role};

#[derive(Debug, Clone)]
pub struct MockEngine {
    /// Pause between streamed words.
    pub word_delay: Duration,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            word_delay: Duration::from_millis(50),
        }
    }
}

impl MockEngine {
    fn generate(request: &AnswerRequest) -> String {
        let question = request
            .turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("");
        let preview: String = question.chars().take(80).collect();
        let ellipsis = if question.chars().count() > 80 { "…" } else { "" };
        format!(
            "[Mock answer] You asked: \"{}{}\". In a live deployment VERA would answer this question about \
             peripheral artery disease in plain, friendly words.",
            preview, ellipsis
        )
    }
}

#[async_trait]
impl AnswerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn answer(&self, request: AnswerRequest) -> EngineResult<Answer> {
        Ok(Answer {
            text: Self::generate(&request),
            citations: Vec::new(),
        })
    }

    async fn stream(&self, request: AnswerRequest) -> EngineResult<AnswerStream> {
        let (tx, rx) = mpsc::channel(100);
        let text = Self::generate(&request);
        let delay = self.word_delay;
        tokio::spawn(async move {
            for word in text.split_inclusive(' ') {
                if tx.send(Ok(word.to_string())).await.is_err() {
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        });
        Ok(rx)
    }
}
