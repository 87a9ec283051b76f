//! Admin surface: research ID management and usage statistics.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use vera_core::{blocking, IdentityDetail, UsageStats};

use crate::error::ApiResult;
use crate::extract::AdminGuard;
use crate::state::AppState;

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateResearchId {
    pub research_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

pub async fn create_research_id(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Json(req): Json<CreateResearchId>,
) -> ApiResult<Json<IdentityDetail>> {
    let (identities, admin) = (state.identities.clone(), state.admin.clone());
    let detail = blocking(move || {
        let created = identities.create_with_status(&req.research_id, req.notes.as_deref(), req.is_active)?;
        admin.identity_detail(&created.research_id)
    })
    .await?;
    tracing::info!(target: "vera::admin", research_id = %detail.identity.research_id, "Research ID created by admin");
    Ok(Json(detail))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_research_ids(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<IdentityDetail>>> {
    let admin = state.admin.clone();
    Ok(Json(blocking(move || admin.list_details(q.include_inactive)).await?))
}

pub async fn get_research_id(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> ApiResult<Json<IdentityDetail>> {
    let admin = state.admin.clone();
    Ok(Json(blocking(move || admin.identity_detail(&research_id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateResearchId {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update_research_id(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(research_id): Path<String>,
    Json(req): Json<UpdateResearchId>,
) -> ApiResult<Json<IdentityDetail>> {
    let (identities, admin) = (state.identities.clone(), state.admin.clone());
    let detail = blocking(move || {
        // Existence check first so an empty patch on an unknown id is still 404.
        identities.get(&research_id)?;
        if let Some(active) = req.is_active {
            identities.set_active(&research_id, active)?;
        }
        if let Some(notes) = req.notes.as_deref() {
            identities.update_notes(&research_id, Some(notes))?;
        }
        admin.identity_detail(&research_id)
    })
    .await?;
    Ok(Json(detail))
}

/// Deactivates; research IDs are never hard-deleted.
pub async fn deactivate_research_id(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> ApiResult<Json<IdentityDetail>> {
    let (identities, admin) = (state.identities.clone(), state.admin.clone());
    let detail = blocking(move || {
        identities.set_active(&research_id, false)?;
        admin.identity_detail(&research_id)
    })
    .await?;
    tracing::info!(target: "vera::admin", research_id = %detail.identity.research_id, "Research ID deactivated");
    Ok(Json(detail))
}

pub async fn stats(_admin: AdminGuard, State(state): State<AppState>) -> ApiResult<Json<UsageStats>> {
    let admin = state.admin.clone();
    Ok(Json(blocking(move || admin.stats()).await?))
}
