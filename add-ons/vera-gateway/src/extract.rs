//! Request extractors: bearer caller, admin guard, client origin.

use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use vera_core::{secrets_match, Origin, VeraError};

use crate::error::ApiError;
use crate::state::AppState;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// The research ID proven by the request's bearer token.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

/// Token string from `Authorization: Bearer <token>`, if present.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let research_id = state.chat.authenticate(bearer_token(parts)).await?;
        Ok(Caller(research_id))
    }
}

/// Passes only when `X-Admin-Password` matches the configured admin password.
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.auth.admin_password.as_deref().filter(|p| !p.is_empty()) else {
            tracing::warn!(target: "vera::admin", "Admin request refused: no admin password configured");
            return Err(VeraError::Unauthorized("admin access is not configured".into()).into());
        };
        let supplied = parts
            .headers
            .get(ADMIN_PASSWORD_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !secrets_match(supplied, expected) {
            tracing::warn!(target: "vera::admin", "Admin request refused: bad password");
            return Err(VeraError::Unauthorized("invalid admin password".into()).into());
        }
        Ok(AdminGuard)
    }
}

/// Client address (first `X-Forwarded-For` hop, else the peer) and user agent.
#[derive(Debug, Clone, Default)]
pub struct ClientOrigin(pub Origin);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientOrigin {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ClientOrigin(Origin {
            ip_address: forwarded.or(peer),
            user_agent,
        }))
    }
}
