//! Session Authenticator: issues and validates bearer tokens for research IDs.

pub mod token;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{VeraError, VeraResult};
use crate::store::identity::IdentityStore;
use crate::store::{research_pk, Database};
use crate::types::{ms_to_datetime, DisclaimerAck, Origin, SessionRecord};
pub use token::{secrets_match, TokenClaims, TokenError, TokenSigner};

pub const DEFAULT_DISCLAIMER_VERSION: &str = "1.0";

/// A freshly minted bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub research_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    db: Database,
    signer: TokenSigner,
    ttl: Duration,
}

/// Sessions store a digest of the bearer string, never the string itself.
fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

impl SessionAuthenticator {
    pub fn new(db: Database, signer: TokenSigner, ttl: Duration) -> Self {
        Self { db, signer, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue_token(&self, research_id: &str, origin: &Origin) -> VeraResult<IssuedToken> {
        let conn = self.db.connect()?;
        let identity = IdentityStore::get_with(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;
        if !identity.is_active {
            tracing::warn!(target: "vera::auth", research_id, "Login refused for deactivated research ID");
            return Err(VeraError::Forbidden("research ID is deactivated".into()));
        }

        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let claims = TokenClaims {
            sub: identity.research_id.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self
            .signer
            .sign(&claims)
            .map_err(|e| VeraError::InvalidArgument(e.to_string()))?;

        let pk = research_pk(&conn, &identity.research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;
        let ts = issued_at.timestamp_millis();
        conn.execute(
            "INSERT INTO user_sessions (research_id_fk, token_id, session_token, created_at_ms, last_active_ms, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)",
            params![
                pk,
                claims.jti,
                token_digest(&token),
                ts,
                origin.ip_address,
                origin.user_agent
            ],
        )?;
        tracing::info!(
            target: "vera::auth",
            research_id = %identity.research_id,
            ip = origin.ip_address.as_deref().unwrap_or("-"),
            "Session issued"
        );

        Ok(IssuedToken {
            token,
            research_id: identity.research_id,
            issued_at,
            expires_at,
        })
    }

    /// Resolve a bearer token to its research ID.
    ///
    /// Cryptographic or expiry failures are `Unauthorized`; a deactivated
    /// identity is `Forbidden` even while its token is still unexpired.
    pub fn validate(&self, token: &str) -> VeraResult<String> {
        let now = Utc::now();
        let claims = self.signer.verify(token.trim(), now.timestamp()).map_err(|e| {
            tracing::debug!(target: "vera::auth", error = %e, "Token rejected");
            VeraError::Unauthorized("invalid or expired token".into())
        })?;

        let conn = self.db.connect()?;
        let identity = IdentityStore::get_with(&conn, &claims.sub)?
            .ok_or_else(|| VeraError::Unauthorized("invalid or expired token".into()))?;
        if !identity.is_active {
            return Err(VeraError::Forbidden("research ID is deactivated".into()));
        }

        conn.execute(
            "UPDATE user_sessions SET last_active_ms = MAX(last_active_ms, ?1) WHERE token_id = ?2",
            params![now.timestamp_millis(), claims.jti],
        )?;
        Ok(identity.research_id)
    }

    /// Claims of a token that passed validation; used to find its session row.
    pub fn claims(&self, token: &str) -> VeraResult<TokenClaims> {
        self.signer
            .verify(token.trim(), Utc::now().timestamp())
            .map_err(|_| VeraError::Unauthorized("invalid or expired token".into()))
    }

    pub fn session(&self, token_id: &str) -> VeraResult<Option<SessionRecord>> {
        let conn = self.db.connect()?;
        let row = conn
            .query_row(
                "SELECT s.token_id, r.research_id, s.created_at_ms, s.last_active_ms, s.ip_address, s.user_agent
                 FROM user_sessions s JOIN research_ids r ON r.id = s.research_id_fk
                 WHERE s.token_id = ?1",
                params![token_id],
                |r| {
                    Ok(SessionRecord {
                        token_id: r.get(0)?,
                        research_id: r.get(1)?,
                        created_at: ms_to_datetime(r.get(2)?),
                        last_active: ms_to_datetime(r.get(3)?),
                        ip_address: r.get(4)?,
                        user_agent: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn record_disclaimer(
        &self,
        research_id: &str,
        ip_address: Option<&str>,
        version: Option<&str>,
    ) -> VeraResult<DisclaimerAck> {
        let version = version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_DISCLAIMER_VERSION);
        let conn = self.db.connect()?;
        let pk = research_pk(&conn, research_id)?
            .ok_or_else(|| VeraError::NotFound(format!("research ID {} not found", research_id)))?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO disclaimer_acknowledgments (research_id_fk, acknowledged_at_ms, ip_address, disclaimer_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![pk, now.timestamp_millis(), ip_address, version],
        )?;
        tracing::info!(target: "vera::auth", research_id, version, "Disclaimer acknowledged");
        Ok(DisclaimerAck {
            research_id: research_id.to_string(),
            acknowledged_at: ms_to_datetime(now.timestamp_millis()),
            ip_address: ip_address.map(str::to_string),
            disclaimer_version: version.to_string(),
        })
    }
}
