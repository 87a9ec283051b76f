use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vera_core::{blocking, DisclaimerAck};

use crate::error::ApiResult;
use crate::extract::{Caller, ClientOrigin};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub research_id: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub research_id: String,
}

pub async fn login(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let auth = state.chat.authenticator().clone();
    let issued = blocking(move || auth.issue_token(req.research_id.trim(), &origin)).await?;
    Ok(Json(LoginResponse {
        access_token: issued.token,
        token_type: "bearer",
        expires_at: issued.expires_at,
        research_id: issued.research_id,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DisclaimerRequest {
    #[serde(default)]
    pub version: Option<String>,
}

pub async fn acknowledge_disclaimer(
    State(state): State<AppState>,
    Caller(research_id): Caller,
    ClientOrigin(origin): ClientOrigin,
    body: Option<Json<DisclaimerRequest>>,
) -> ApiResult<Json<DisclaimerAck>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let auth = state.chat.authenticator().clone();
    let ack = blocking(move || {
        auth.record_disclaimer(&research_id, origin.ip_address.as_deref(), req.version.as_deref())
    })
    .await?;
    Ok(Json(ack))
}
