//! Identity Store: the registry of research IDs.
//!
//! Rows are never deleted. Deactivation flips `is_active`; history written by a
//! deactivated identity stays readable.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::Database;
use crate::error::{VeraError, VeraResult};
use crate::types::{ms_to_datetime, now_ms, Identity};

/// Research IDs are short operator-assigned codes (e.g. `RID001`).
pub const MAX_RESEARCH_ID_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct IdentityStore {
    db: Database,
}

fn identity_from_row(r: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        research_id: r.get(0)?,
        created_at: ms_to_datetime(r.get(1)?),
        is_active: r.get(2)?,
        notes: r.get(3)?,
    })
}

impl IdentityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an active identity. Fails with `Conflict` when the id is taken.
    pub fn create(&self, research_id: &str, notes: Option<&str>) -> VeraResult<Identity> {
        self.create_with_status(research_id, notes, true)
    }

    pub fn create_with_status(
        &self,
        research_id: &str,
        notes: Option<&str>,
        is_active: bool,
    ) -> VeraResult<Identity> {
        let rid = research_id.trim();
        if rid.is_empty() {
            return Err(VeraError::InvalidArgument("research_id must not be empty".into()));
        }
        if rid.chars().count() > MAX_RESEARCH_ID_LEN {
            return Err(VeraError::InvalidArgument(format!(
                "research_id exceeds {} characters",
                MAX_RESEARCH_ID_LEN
            )));
        }
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let ts = now_ms();
        let conn = self.db.connect()?;
        let inserted = conn.execute(
            "INSERT INTO research_ids (research_id, created_at_ms, is_active, notes) VALUES (?1, ?2, ?3, ?4)",
            params![rid, ts, is_active, notes],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(VeraError::Conflict(format!("research ID {} already exists", rid)));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(target: "vera::identity", research_id = %rid, is_active, "Research ID created");
        Ok(Identity {
            research_id: rid.to_string(),
            is_active,
            created_at: ms_to_datetime(ts),
            notes: notes.map(str::to_string),
        })
    }

    pub fn get(&self, research_id: &str) -> VeraResult<Identity> {
        let conn = self.db.connect()?;
        Self::get_with(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))
    }

    pub(crate) fn get_with(conn: &Connection, research_id: &str) -> rusqlite::Result<Option<Identity>> {
        conn.query_row(
            "SELECT research_id, created_at_ms, is_active, notes FROM research_ids WHERE research_id = ?1",
            params![research_id],
            identity_from_row,
        )
        .optional()
    }

    pub fn list(&self, include_inactive: bool) -> VeraResult<Vec<Identity>> {
        let conn = self.db.connect()?;
        let sql = if include_inactive {
            "SELECT research_id, created_at_ms, is_active, notes FROM research_ids ORDER BY id ASC"
        } else {
            "SELECT research_id, created_at_ms, is_active, notes FROM research_ids WHERE is_active = 1 ORDER BY id ASC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], identity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Idempotent activation toggle. Returns the identity as stored afterwards.
    pub fn set_active(&self, research_id: &str, active: bool) -> VeraResult<Identity> {
        let conn = self.db.connect()?;
        let changed = conn.execute(
            "UPDATE research_ids SET is_active = ?1 WHERE research_id = ?2",
            params![active, research_id],
        )?;
        if changed == 0 {
            return Err(VeraError::NotFound(format!("research ID {} not found", research_id)));
        }
        tracing::info!(target: "vera::identity", research_id, active, "Research ID status set");
        Self::get_with(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))
    }

    pub fn update_notes(&self, research_id: &str, notes: Option<&str>) -> VeraResult<Identity> {
        let conn = self.db.connect()?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let changed = conn.execute(
            "UPDATE research_ids SET notes = ?1 WHERE research_id = ?2",
            params![notes, research_id],
        )?;
        if changed == 0 {
            return Err(VeraError::NotFound(format!("research ID {} not found", research_id)));
        }
        Self::get_with(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))
    }

    /// Insert `RID001`..`RID010` for local testing. Existing ids are skipped.
    /// Returns (created, skipped).
    pub fn seed_test_ids(&self) -> VeraResult<(usize, usize)> {
        let mut created = 0;
        let mut skipped = 0;
        for n in 1..=10 {
            let rid = format!("RID{:03}", n);
            let notes = format!("Test research ID {:03}", n);
            match self.create(&rid, Some(&notes)) {
                Ok(_) => created += 1,
                Err(VeraError::Conflict(_)) => skipped += 1,
                Err(e) => return Err(e),
            }
        }
        Ok((created, skipped))
    }
}
