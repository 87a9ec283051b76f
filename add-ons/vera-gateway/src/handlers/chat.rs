use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vera_core::{new_conversation_id, ChatRequest, IngestRequest, Message, Role};

use crate::error::ApiResult;
use crate::extract::Caller;
use crate::state::AppState;

/// Wire shape of a stored message.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub model_used: Option<String>,
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            timestamp: m.timestamp,
            model_used: m.model_used,
            audio_url: m.audio_url,
            provider: m.provider.map(|p| p.provider),
        }
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<MessageView>> {
    let reply = state.chat.send_message(&caller, req).await?;
    Ok(Json(reply.into()))
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub research_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageView>,
    pub total: u64,
    pub research_id: String,
}

pub async fn history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<HistoryRequest>,
) -> ApiResult<Json<HistoryResponse>> {
    let conversation = req.conversation_id.as_deref().filter(|c| !c.trim().is_empty());
    let page = state
        .chat
        .history(&caller, &req.research_id, conversation, req.limit, req.offset)
        .await?;
    Ok(Json(HistoryResponse {
        messages: page.messages.into_iter().map(MessageView::from).collect(),
        total: page.total,
        research_id: req.research_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    #[serde(default = "default_conversations_limit")]
    pub limit: usize,
}

fn default_conversations_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub research_id: String,
    pub conversations: Vec<String>,
}

pub async fn recent_conversations(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(q): Query<ConversationsQuery>,
) -> ApiResult<Json<ConversationsResponse>> {
    let conversations = state.chat.recent_conversations(&caller, q.limit).await?;
    Ok(Json(ConversationsResponse {
        research_id: caller,
        conversations,
    }))
}

#[derive(Debug, Serialize)]
pub struct NewConversationResponse {
    pub conversation_id: String,
    pub research_id: String,
}

pub async fn new_conversation(Caller(caller): Caller) -> Json<NewConversationResponse> {
    let conversation_id = new_conversation_id(Utc::now());
    tracing::info!(target: "vera::chat", research_id = %caller, conversation_id = %conversation_id, "Conversation started");
    Json(NewConversationResponse {
        conversation_id,
        research_id: caller,
    })
}

pub async fn save_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<IngestRequest>,
) -> ApiResult<Json<MessageView>> {
    let saved = state.chat.ingest(&caller, req).await?;
    Ok(Json(saved.into()))
}
