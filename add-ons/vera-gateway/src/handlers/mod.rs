pub mod admin;
pub mod auth;
pub mod chat;
pub mod ws;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": state.config.server.app_name,
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/api/v1",
    }))
}
