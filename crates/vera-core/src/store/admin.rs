//! Read-only aggregates for the admin surface.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::Database;
use crate::error::{VeraError, VeraResult};
use crate::store::identity::IdentityStore;
use crate::types::{ms_to_datetime, now_ms, Identity};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// An identity plus its usage counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityDetail {
    #[serde(flatten)]
    pub identity: Identity,
    pub total_sessions: u64,
    pub total_messages: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub total_research_ids: u64,
    pub active_research_ids: u64,
    pub total_sessions: u64,
    pub active_sessions_24h: u64,
    pub total_conversations: u64,
    pub total_messages: u64,
    pub messages_24h: u64,
}

#[derive(Debug, Clone)]
pub struct AdminQueries {
    db: Database,
}

impl AdminQueries {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn identity_detail(&self, research_id: &str) -> VeraResult<IdentityDetail> {
        let conn = self.db.connect()?;
        let identity = IdentityStore::get_with(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;

        let (total_sessions, last_activity): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(s.id), MAX(s.last_active_ms)
             FROM user_sessions s JOIN research_ids r ON r.id = s.research_id_fk
             WHERE r.research_id = ?1",
            params![research_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let total_messages: i64 = conn.query_row(
            "SELECT COUNT(m.id)
             FROM messages m JOIN research_ids r ON r.id = m.research_id_fk
             WHERE r.research_id = ?1",
            params![research_id],
            |r| r.get(0),
        )?;

        Ok(IdentityDetail {
            identity,
            total_sessions: total_sessions.max(0) as u64,
            total_messages: total_messages.max(0) as u64,
            last_activity: last_activity.map(ms_to_datetime),
        })
    }

    pub fn list_details(&self, include_inactive: bool) -> VeraResult<Vec<IdentityDetail>> {
        let ids = IdentityStore::new(self.db.clone()).list(include_inactive)?;
        ids.iter()
            .map(|identity| self.identity_detail(&identity.research_id))
            .collect()
    }

    pub fn stats(&self) -> VeraResult<UsageStats> {
        let conn = self.db.connect()?;
        let since = now_ms() - DAY_MS;
        let count = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<u64, rusqlite::Error> {
            let n: i64 = conn.query_row(sql, p, |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(UsageStats {
            total_research_ids: count("SELECT COUNT(*) FROM research_ids", &[])?,
            active_research_ids: count("SELECT COUNT(*) FROM research_ids WHERE is_active = 1", &[])?,
            total_sessions: count("SELECT COUNT(*) FROM user_sessions", &[])?,
            active_sessions_24h: count(
                "SELECT COUNT(*) FROM user_sessions WHERE last_active_ms >= ?1",
                &[&since],
            )?,
            total_conversations: count("SELECT COUNT(DISTINCT conversation_id) FROM messages", &[])?,
            total_messages: count("SELECT COUNT(*) FROM messages", &[])?,
            messages_24h: count("SELECT COUNT(*) FROM messages WHERE timestamp_ms >= ?1", &[&since])?,
        })
    }
}
