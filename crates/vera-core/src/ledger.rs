//! Conversation Ledger: append-only, per-conversation ordered message storage.
//!
//! Appends run in an `IMMEDIATE` transaction so the ownership check, the
//! monotonic timestamp and the insert see one consistent snapshot. Ordering
//! within a conversation is `(timestamp_ms, id)`.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::{VeraError, VeraResult};
use crate::store::{research_pk, Database};
use crate::types::{ms_to_datetime, now_ms, HistoryPage, Message, NewMessage, ProviderMeta};

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 10_000;
pub const DEFAULT_MAX_HISTORY_LIMIT: usize = 500;
pub const MAX_CONVERSATION_ID_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLimits {
    pub max_content_chars: usize,
    pub max_history_limit: usize,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            max_history_limit: DEFAULT_MAX_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationLedger {
    db: Database,
    limits: LedgerLimits,
}

const MESSAGE_COLUMNS: &str = "m.id, r.research_id, m.conversation_id, m.timestamp_ms, m.role, m.content, \
     m.model_used, m.audio_url, m.provider, m.provider_conversation_id, m.provider_message_id";

fn message_from_row(r: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = r.get(4)?;
    let role = role.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, format!("bad role {}", role).into())
    })?;
    let provider: Option<String> = r.get(8)?;
    Ok(Message {
        id: r.get(0)?,
        research_id: r.get(1)?,
        conversation_id: r.get(2)?,
        timestamp: ms_to_datetime(r.get(3)?),
        role,
        content: r.get(5)?,
        model_used: r.get(6)?,
        audio_url: r.get(7)?,
        provider: match provider {
            Some(provider) => Some(ProviderMeta {
                provider,
                conversation_id: r.get(9)?,
                message_id: r.get(10)?,
            }),
            None => None,
        },
    })
}

impl ConversationLedger {
    pub fn new(db: Database, limits: LedgerLimits) -> Self {
        Self { db, limits }
    }

    pub fn limits(&self) -> LedgerLimits {
        self.limits
    }

    fn check_conversation_id(conversation_id: &str) -> VeraResult<()> {
        if conversation_id.trim().is_empty() {
            return Err(VeraError::InvalidArgument("conversation_id must not be empty".into()));
        }
        if conversation_id.chars().count() > MAX_CONVERSATION_ID_LEN {
            return Err(VeraError::InvalidArgument(format!(
                "conversation_id exceeds {} characters",
                MAX_CONVERSATION_ID_LEN
            )));
        }
        Ok(())
    }

    /// A conversation belongs to whoever wrote its first message; unknown
    /// conversations belong to nobody yet.
    fn check_owner(
        conn: &Connection,
        pk: i64,
        research_id: &str,
        conversation_id: &str,
        action: &str,
    ) -> VeraResult<()> {
        let owner: Option<i64> = conn
            .query_row(
                "SELECT research_id_fk FROM messages WHERE conversation_id = ?1 ORDER BY id ASC LIMIT 1",
                params![conversation_id],
                |r| r.get(0),
            )
            .optional()?;
        match owner {
            Some(owner) if owner != pk => {
                tracing::warn!(
                    target: "vera::ledger",
                    research_id,
                    conversation_id,
                    "{} refused: conversation belongs to another research ID",
                    action
                );
                Err(VeraError::Forbidden("conversation belongs to another research ID".into()))
            }
            _ => Ok(()),
        }
    }

    /// Append one message. The conversation is owned by whoever wrote its first message.
    pub fn append(&self, msg: NewMessage) -> VeraResult<Message> {
        if msg.content.trim().is_empty() {
            return Err(VeraError::InvalidArgument("content must not be empty".into()));
        }
        if msg.content.chars().count() > self.limits.max_content_chars {
            return Err(VeraError::InvalidArgument(format!(
                "content exceeds {} characters",
                self.limits.max_content_chars
            )));
        }
        Self::check_conversation_id(&msg.conversation_id)?;

        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let pk = research_pk(&tx, &msg.research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", msg.research_id)))?;

        Self::check_owner(&tx, pk, &msg.research_id, &msg.conversation_id, "Append")?;

        let last: Option<i64> = tx.query_row(
            "SELECT MAX(timestamp_ms) FROM messages WHERE conversation_id = ?1",
            params![msg.conversation_id],
            |r| r.get(0),
        )?;
        let ts = last.map_or(now_ms(), |last| now_ms().max(last));

        let (provider, provider_conv, provider_msg) = match &msg.provider {
            Some(p) => (Some(p.provider.as_str()), p.conversation_id.as_deref(), p.message_id.as_deref()),
            None => (None, None, None),
        };
        tx.execute(
            "INSERT INTO messages (research_id_fk, conversation_id, timestamp_ms, role, content, model_used, audio_url, provider, provider_conversation_id, provider_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                pk,
                msg.conversation_id,
                ts,
                msg.role.as_str(),
                msg.content,
                msg.model_used,
                msg.audio_url,
                provider,
                provider_conv,
                provider_msg
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(
            target: "vera::ledger",
            research_id = %msg.research_id,
            conversation_id = %msg.conversation_id,
            role = %msg.role,
            id,
            "Message appended"
        );
        Ok(Message {
            id,
            research_id: msg.research_id,
            conversation_id: msg.conversation_id,
            timestamp: ms_to_datetime(ts),
            role: msg.role,
            content: msg.content,
            model_used: msg.model_used,
            audio_url: msg.audio_url,
            provider: msg.provider,
        })
    }

    /// Page of a research ID's messages, optionally narrowed to one conversation.
    /// Naming another research ID's conversation is `Forbidden`.
    ///
    /// `offset` skips the newest messages; the page comes back oldest-first.
    pub fn history(
        &self,
        research_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> VeraResult<HistoryPage> {
        if limit > self.limits.max_history_limit {
            return Err(VeraError::InvalidArgument(format!(
                "limit exceeds {}",
                self.limits.max_history_limit
            )));
        }
        let conn = self.db.connect()?;
        let pk = research_pk(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;

        let (total, mut messages) = match conversation_id {
            Some(conv) => {
                Self::check_owner(&conn, pk, research_id, conv, "History read")?;
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE research_id_fk = ?1 AND conversation_id = ?2",
                    params![pk, conv],
                    |r| r.get(0),
                )?;
                let sql = format!(
                    "SELECT {} FROM messages m JOIN research_ids r ON r.id = m.research_id_fk
                     WHERE m.research_id_fk = ?1 AND m.conversation_id = ?2
                     ORDER BY m.timestamp_ms DESC, m.id DESC LIMIT ?3 OFFSET ?4",
                    MESSAGE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![pk, conv, limit as i64, offset as i64], message_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            }
            None => {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE research_id_fk = ?1",
                    params![pk],
                    |r| r.get(0),
                )?;
                let sql = format!(
                    "SELECT {} FROM messages m JOIN research_ids r ON r.id = m.research_id_fk
                     WHERE m.research_id_fk = ?1
                     ORDER BY m.timestamp_ms DESC, m.id DESC LIMIT ?2 OFFSET ?3",
                    MESSAGE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![pk, limit as i64, offset as i64], message_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            }
        };
        messages.reverse();
        Ok(HistoryPage {
            messages,
            total: total.max(0) as u64,
        })
    }

    /// The `n` most recent messages of one conversation, oldest-first.
    pub fn context(&self, research_id: &str, conversation_id: &str, n: usize) -> VeraResult<Vec<Message>> {
        let limit = n.min(self.limits.max_history_limit);
        Ok(self.history(research_id, Some(conversation_id), limit, 0)?.messages)
    }

    /// Distinct conversation ids, most recently active first.
    pub fn recent_conversations(&self, research_id: &str, limit: usize) -> VeraResult<Vec<String>> {
        if limit > self.limits.max_history_limit {
            return Err(VeraError::InvalidArgument(format!(
                "limit exceeds {}",
                self.limits.max_history_limit
            )));
        }
        let conn = self.db.connect()?;
        let pk = research_pk(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id FROM messages WHERE research_id_fk = ?1
             GROUP BY conversation_id
             ORDER BY MAX(timestamp_ms) DESC, MAX(id) DESC
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![pk, limit as i64], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
