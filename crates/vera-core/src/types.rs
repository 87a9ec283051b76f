//! Domain records: research identities, sessions, messages and history pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VeraError;

/// Speaker of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = VeraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(VeraError::InvalidArgument(format!("unknown role '{}'", other))),
        }
    }
}

/// An authorized caller ("research ID").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub research_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Bookkeeping row for one issued bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token_id: String,
    pub research_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Where a login came from. Both fields are free-form and optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Correlation identifiers for turns captured by an external voice provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMeta {
    pub provider: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// One persisted turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub research_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub model_used: Option<String>,
    pub audio_url: Option<String>,
    pub provider: Option<ProviderMeta>,
}

/// A message about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub research_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub model_used: Option<String>,
    pub audio_url: Option<String>,
    pub provider: Option<ProviderMeta>,
}

impl NewMessage {
    pub fn new(
        research_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            research_id: research_id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            model_used: None,
            audio_url: None,
            provider: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn with_audio(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = audio_url;
        self
    }

    pub fn with_provider(mut self, provider: Option<ProviderMeta>) -> Self {
        self.provider = provider;
        self
    }
}

/// A page of history plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub total: u64,
}

/// Recorded acknowledgment of the research disclaimer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclaimerAck {
    pub research_id: String,
    pub acknowledged_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub disclaimer_version: String,
}

/// Generates a conversation identifier: `conv_<YYYYMMDDHHMMSS>_<8 hex>`.
///
/// The ledger treats the result as opaque; the random suffix keeps ids unique
/// when one caller opens several conversations within the same second.
pub fn new_conversation_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("conv_{}_{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
