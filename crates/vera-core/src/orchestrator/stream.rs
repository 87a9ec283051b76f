//! Streaming chat channel: the per-connection state machine behind the websocket.
//!
//! `AwaitingAuth -> Ready -> Processing -> Ready`, with `Closed` terminal. Frames
//! are handled one at a time. A peer that goes away mid-answer abandons the
//! engine stream and nothing is stored for the assistant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ChatOrchestrator;
use crate::engine::{AnswerRequest, AnswerStream, EngineError};
use crate::error::VeraError;
use crate::types::{NewMessage, Role};

/// Inbound websocket frame. Every field is optional so that incomplete frames
/// can be answered with a precise error instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub research_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Error { error: String },
    UserMessageSaved { conversation_id: String },
    Chunk { content: String },
    Complete { full_response: String },
    Audio { audio_base64: String, audio_url: String },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error { error: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    AwaitingAuth,
    Ready,
    Processing,
    Closed,
}

/// The peer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl std::fmt::Display for Disconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("peer disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// Where outbound events go.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: OutboundEvent) -> Result<(), Disconnected>;

    /// Resolves once the peer has gone away. Sinks that cannot observe the
    /// peer never resolve.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }
}

pub struct ChatChannel {
    orchestrator: ChatOrchestrator,
    state: ChannelState,
}

/// An exchange ended without a stored assistant reply.
enum Abort {
    Failed(String),
    Gone,
}

impl From<Disconnected> for Abort {
    fn from(_: Disconnected) -> Self {
        Abort::Gone
    }
}

impl ChatChannel {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self {
            orchestrator,
            state: ChannelState::AwaitingAuth,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Handle one raw text frame.
    pub async fn handle_text<S: EventSink>(&mut self, text: &str, sink: &mut S) -> Result<(), Disconnected> {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => self.handle_frame(frame, sink).await,
            Err(e) => {
                tracing::debug!(target: "vera::ws", error = %e, "Unparseable frame");
                self.emit(sink, OutboundEvent::error("Invalid message format")).await
            }
        }
    }

    async fn emit<S: EventSink>(&mut self, sink: &mut S, event: OutboundEvent) -> Result<(), Disconnected> {
        let sent = sink.emit(event).await;
        if sent.is_err() {
            self.state = ChannelState::Closed;
        }
        sent
    }

    pub async fn handle_frame<S: EventSink>(&mut self, frame: InboundFrame, sink: &mut S) -> Result<(), Disconnected> {
        if self.state == ChannelState::Closed {
            return Err(Disconnected);
        }

        let research_id = match self.admit(&frame).await {
            Ok(rid) => rid,
            Err(message) => return self.emit(sink, OutboundEvent::error(message)).await,
        };
        if self.state == ChannelState::AwaitingAuth {
            self.state = ChannelState::Ready;
        }
        let conversation_id = match frame.conversation_id.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => c.to_string(),
            None => return self.emit(sink, OutboundEvent::error("Missing conversation_id")).await,
        };
        let content = match frame.message {
            Some(m) if !m.trim().is_empty() => m,
            _ => return self.emit(sink, OutboundEvent::error("Missing message")).await,
        };

        let model = self.orchestrator.model_for(frame.model.as_deref());

        if let Err(e) = self
            .orchestrator
            .append(NewMessage::new(&research_id, &conversation_id, Role::User, content))
            .await
        {
            return self.emit(sink, OutboundEvent::error(e.message())).await;
        }
        self.emit(
            sink,
            OutboundEvent::UserMessageSaved {
                conversation_id: conversation_id.clone(),
            },
        )
        .await?;

        self.state = ChannelState::Processing;
        let outcome = self.process(&research_id, &conversation_id, &model, sink).await;
        match outcome {
            Ok(()) => {
                self.state = ChannelState::Ready;
                Ok(())
            }
            Err(Abort::Failed(message)) => {
                self.state = ChannelState::Ready;
                self.emit(sink, OutboundEvent::error(message)).await
            }
            Err(Abort::Gone) => {
                tracing::info!(
                    target: "vera::ws",
                    research_id = %research_id,
                    conversation_id = %conversation_id,
                    "Client left mid-answer; assistant reply discarded"
                );
                self.state = ChannelState::Closed;
                Err(Disconnected)
            }
        }
    }

    /// Token and identity checks. Errors are user-facing messages.
    async fn admit(&self, frame: &InboundFrame) -> Result<String, String> {
        let token = frame
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "Missing token".to_string())?;
        let caller = self
            .orchestrator
            .authenticate(Some(token))
            .await
            .map_err(|e| match e {
                VeraError::Forbidden(_) => "Research ID is deactivated".to_string(),
                _ => "Invalid token".to_string(),
            })?;
        let declared = frame.research_id.as_deref().map(str::trim).unwrap_or_default();
        self.orchestrator
            .authorize(&caller, declared)
            .map_err(|_| "Research ID mismatch".to_string())?;
        Ok(caller)
    }

    async fn process<S: EventSink>(
        &self,
        research_id: &str,
        conversation_id: &str,
        model: &str,
        sink: &mut S,
    ) -> Result<(), Abort> {
        let orchestrator = &self.orchestrator;
        let turns = orchestrator
            .build_context(research_id, conversation_id)
            .await
            .map_err(|e| Abort::Failed(e.message().to_string()))?;
        let request = AnswerRequest {
            model: model.to_string(),
            turns,
        };
        tracing::info!(
            target: "vera::ws",
            research_id,
            conversation_id,
            model,
            "Streaming answer"
        );

        let timeout = orchestrator.settings().engine_timeout;
        let opened = tokio::select! {
            biased;
            _ = sink.closed() => return Err(Abort::Gone),
            opened = tokio::time::timeout(timeout, orchestrator.engine.stream(request)) => opened,
        };
        let mut rx: AnswerStream = match opened {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => return Err(Abort::Failed(engine_failure(&e))),
            Err(_) => return Err(Abort::Failed(engine_failure(&EngineError::Timeout))),
        };

        let mut full = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(Abort::Gone),
                next = rx.recv() => next,
            };
            match next {
                Some(Ok(piece)) => {
                    if piece.is_empty() {
                        continue;
                    }
                    full.push_str(&piece);
                    sink.emit(OutboundEvent::Chunk { content: piece }).await?;
                }
                Some(Err(e)) => return Err(Abort::Failed(engine_failure(&e))),
                None => break,
            }
        }
        drop(rx);

        if full.trim().is_empty() {
            return Err(Abort::Failed("The answer engine returned an empty response".into()));
        }
        sink.emit(OutboundEvent::Complete {
            full_response: full.clone(),
        })
        .await?;

        let audio = orchestrator.synthesize_best_effort(&full).await;
        if let Some(clip) = &audio {
            sink.emit(OutboundEvent::Audio {
                audio_base64: clip.base64(),
                audio_url: clip.url.clone(),
            })
            .await?;
        }

        orchestrator
            .append(
                NewMessage::new(research_id, conversation_id, Role::Assistant, full)
                    .with_model(model)
                    .with_audio(audio.map(|a| a.url)),
            )
            .await
            .map_err(|e| Abort::Failed(e.message().to_string()))?;
        Ok(())
    }
}

fn engine_failure(err: &EngineError) -> String {
    tracing::error!(target: "vera::ws", error = %err, "Answer engine failed");
    match err {
        EngineError::Timeout => "The answer engine timed out".to_string(),
        other => format!("The answer engine failed: {}", other),
    }
}
