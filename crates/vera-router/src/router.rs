//! Live answer engine: OpenAI-compatible chat completions, non-streaming (JSON)
//! and streaming (SSE).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::sse::{SseDecoder, SseEvent};
use vera_core::{
    Answer, AnswerEngine, AnswerRequest, AnswerStream, Citation, EngineConfig, EngineError, EngineResult,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_BUFFER: usize = 100;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retrieval: Option<RetrievalParams<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Passed through untouched for retrieval-backed deployments.
#[derive(Serialize)]
struct RetrievalParams<'a> {
    vector_store: &'a str,
    chunk_size: u32,
    chunk_overlap: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Routes a conversation context to an OpenAI-compatible endpoint.
pub struct ModelRouter {
    cfg: EngineConfig,
    api_key: String,
    client: reqwest::Client,
}

fn http_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::Http(err.to_string())
    }
}

impl ModelRouter {
    pub fn new(cfg: EngineConfig) -> EngineResult<Self> {
        let api_key = cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::Config("missing engine.api_key".into()))?
            .to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(Self { cfg, api_key, client })
    }

    fn body<'a>(&'a self, request: &'a AnswerRequest, stream: bool) -> ChatRequest<'a> {
        let model = if request.model.trim().is_empty() {
            self.cfg.model.as_str()
        } else {
            request.model.as_str()
        };
        ChatRequest {
            model,
            messages: request
                .turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
            stream: stream.then_some(true),
            retrieval: self.cfg.vector_store_path.as_deref().map(|vector_store| RetrievalParams {
                vector_store,
                chunk_size: self.cfg.chunk_size,
                chunk_overlap: self.cfg.chunk_overlap,
            }),
        }
    }

    async fn post(&self, body: &ChatRequest<'_>) -> EngineResult<reqwest::Response> {
        let response = self
            .client
            .post(&self.cfg.api_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(target: "vera::engine", status = %status, body = %body, "Engine returned an error");
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn answer_whole(&self, request: &AnswerRequest) -> EngineResult<Answer> {
        let body = self.body(request, false);
        tracing::info!(target: "vera::engine", model = body.model, turns = body.messages.len(), "Dispatching completion");
        let response = self.post(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                target: "vera::engine",
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Token usage"
            );
        }
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EngineError::Decode("response carried no choices".into()))?;
        Ok(Answer {
            text,
            citations: parsed
                .citations
                .into_iter()
                .map(|source| Citation { source, chunk_id: None })
                .collect(),
        })
    }

    async fn stream_sse(&self, request: &AnswerRequest) -> EngineResult<AnswerStream> {
        let body = self.body(request, true);
        let model = body.model.to_string();
        tracing::info!(target: "vera::engine", model = %model, "Streaming session started");
        let response = self.post(&body).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Interrupted(e.to_string()))).await;
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Text(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                tracing::debug!(target: "vera::engine", model = %model, "Receiver dropped; abandoning stream");
                                return;
                            }
                        }
                        SseEvent::Done => {
                            tracing::info!(target: "vera::engine", model = %model, "Stream completed");
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl AnswerEngine for ModelRouter {
    fn name(&self) -> &str {
        &self.cfg.provider
    }

    async fn answer(&self, request: AnswerRequest) -> EngineResult<Answer> {
        self.answer_whole(&request).await
    }

    /// With streaming disabled the whole answer arrives as a single increment.
    async fn stream(&self, request: AnswerRequest) -> EngineResult<AnswerStream> {
        if self.cfg.streaming {
            return self.stream_sse(&request).await;
        }
        let answer = self.answer_whole(&request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(answer.text)).await;
        Ok(rx)
    }
}
