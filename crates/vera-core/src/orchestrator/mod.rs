//! Chat Orchestrator: authorizes a turn, records it, asks the Answer Engine,
//! optionally voices the reply and records that too.
//!
//! The orchestrator owns no persistent state; every collaborator is handed in.

pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::SessionAuthenticator;
use crate::config::ChatConfig;
use crate::engine::{AnswerEngine, AnswerRequest, ChatTurn};
use crate::error::{VeraError, VeraResult};
use crate::ledger::ConversationLedger;
use crate::speech::{AudioArtifact, SpeechSynthesizer};
use crate::store::blocking;
use crate::types::{HistoryPage, Message, NewMessage, ProviderMeta, Role};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    pub context_window: usize,
    pub engine_timeout: Duration,
    pub default_model: String,
}

impl From<&ChatConfig> for ChatSettings {
    fn from(cfg: &ChatConfig) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone(),
            context_window: cfg.context_window,
            engine_timeout: cfg.engine_timeout(),
            default_model: cfg.default_model.clone(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

/// One user turn submitted over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub research_id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// A turn captured elsewhere (e.g. a voice agent) and stored verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub research_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_conversation_id: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    auth: SessionAuthenticator,
    ledger: ConversationLedger,
    engine: Arc<dyn AnswerEngine>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        auth: SessionAuthenticator,
        ledger: ConversationLedger,
        engine: Arc<dyn AnswerEngine>,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            auth,
            ledger,
            engine,
            speech,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    pub fn authenticator(&self) -> &SessionAuthenticator {
        &self.auth
    }

    /// Resolve a bearer token. A missing token is `Unauthorized`, never anonymous.
    pub async fn authenticate(&self, token: Option<&str>) -> VeraResult<String> {
        let token = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => return Err(VeraError::Unauthorized("missing bearer token".into())),
        };
        let auth = self.auth.clone();
        blocking(move || auth.validate(&token)).await
    }

    /// The authenticated caller may only act as itself.
    pub fn authorize(&self, caller: &str, declared: &str) -> VeraResult<()> {
        if caller != declared {
            tracing::warn!(target: "vera::chat", caller, declared, "Identity mismatch");
            return Err(VeraError::Forbidden("research ID does not match token".into()));
        }
        Ok(())
    }

    fn model_for(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.settings.default_model)
            .to_string()
    }

    /// Append on the blocking pool.
    pub async fn append(&self, msg: NewMessage) -> VeraResult<Message> {
        let ledger = self.ledger.clone();
        blocking(move || ledger.append(msg)).await
    }

    /// System instruction followed by the recent user/assistant turns.
    pub async fn build_context(&self, research_id: &str, conversation_id: &str) -> VeraResult<Vec<ChatTurn>> {
        let ledger = self.ledger.clone();
        let (rid, conv, window) = (
            research_id.to_string(),
            conversation_id.to_string(),
            self.settings.context_window,
        );
        let recent = blocking(move || ledger.context(&rid, &conv, window)).await?;
        let mut turns = Vec::with_capacity(recent.len() + 1);
        turns.push(ChatTurn::new(Role::System, self.settings.system_prompt.clone()));
        turns.extend(
            recent
                .into_iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .map(|m| ChatTurn::new(m.role, m.content)),
        );
        Ok(turns)
    }

    /// Synthesis never fails the exchange.
    pub(crate) async fn synthesize_best_effort(&self, text: &str) -> Option<AudioArtifact> {
        let speech = self.speech.as_ref()?;
        match speech.synthesize(text).await {
            Ok(clip) => Some(clip),
            Err(e) => {
                tracing::warn!(target: "vera::voice", error = %e, "Speech synthesis failed; continuing without audio");
                None
            }
        }
    }

    /// Synchronous exchange. Returns the persisted assistant message.
    pub async fn send_message(&self, caller: &str, req: ChatRequest) -> VeraResult<Message> {
        self.authorize(caller, &req.research_id)?;
        let model = self.model_for(req.model.as_deref());

        self.append(NewMessage::new(
            &req.research_id,
            &req.conversation_id,
            Role::User,
            req.content,
        ))
        .await?;

        let turns = self.build_context(&req.research_id, &req.conversation_id).await?;
        let request = AnswerRequest {
            model: model.clone(),
            turns,
        };
        tracing::info!(
            target: "vera::chat",
            research_id = %req.research_id,
            conversation_id = %req.conversation_id,
            model = %model,
            engine = self.engine.name(),
            "Requesting answer"
        );

        let answer = match tokio::time::timeout(self.settings.engine_timeout, self.engine.answer(request)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                tracing::error!(target: "vera::chat", conversation_id = %req.conversation_id, error = %e, "Answer engine failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!(
                    target: "vera::chat",
                    conversation_id = %req.conversation_id,
                    timeout_secs = self.settings.engine_timeout.as_secs(),
                    "Answer engine timed out"
                );
                return Err(VeraError::upstream_timeout(format!(
                    "answer engine did not respond within {}s",
                    self.settings.engine_timeout.as_secs()
                )));
            }
        };
        if answer.text.trim().is_empty() {
            return Err(VeraError::upstream_failure("answer engine returned an empty answer"));
        }

        let audio = self.synthesize_best_effort(&answer.text).await;
        self.append(
            NewMessage::new(&req.research_id, &req.conversation_id, Role::Assistant, answer.text)
                .with_model(model)
                .with_audio(audio.map(|a| a.url)),
        )
        .await
    }

    pub async fn history(
        &self,
        caller: &str,
        research_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> VeraResult<HistoryPage> {
        self.authorize(caller, research_id)?;
        let ledger = self.ledger.clone();
        let rid = research_id.to_string();
        let conv = conversation_id.map(str::to_string);
        blocking(move || ledger.history(&rid, conv.as_deref(), limit, offset)).await
    }

    pub async fn recent_conversations(&self, caller: &str, limit: usize) -> VeraResult<Vec<String>> {
        let ledger = self.ledger.clone();
        let rid = caller.to_string();
        blocking(move || ledger.recent_conversations(&rid, limit)).await
    }

    /// Store an externally produced turn under the same ownership rules as chat.
    pub async fn ingest(&self, caller: &str, req: IngestRequest) -> VeraResult<Message> {
        self.authorize(caller, &req.research_id)?;
        let provider = req.provider.filter(|p| !p.trim().is_empty()).map(|provider| ProviderMeta {
            provider,
            conversation_id: req.provider_conversation_id,
            message_id: req.provider_message_id,
        });
        let msg = self
            .append(
                NewMessage::new(&req.research_id, &req.conversation_id, req.role, req.content)
                    .with_provider(provider),
            )
            .await?;
        tracing::info!(
            target: "vera::chat",
            research_id = %msg.research_id,
            conversation_id = %msg.conversation_id,
            role = %msg.role,
            "External message saved"
        );
        Ok(msg)
    }
}
