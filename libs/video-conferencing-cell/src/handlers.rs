// libs/video-conferencing-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use appointment_cell::handlers::requester_for;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::services::AccessTokenIssuer;

pub struct VideoState {
    pub config: Arc<AppConfig>,
    pub issuer: Arc<AccessTokenIssuer>,
}

impl VideoState {
    pub fn new(config: Arc<AppConfig>, issuer: Arc<AccessTokenIssuer>) -> Self {
        Self { config, issuer }
    }
}

// ==============================================================================
// HEALTH
// ==============================================================================

pub async fn video_health_check(State(state): State<Arc<VideoState>>) -> Json<Value> {
    let configured = state.issuer.is_configured();
    let status = if configured { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "service": "video-conferencing-cell",
        "token_issuance": configured,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==============================================================================
// TOKEN HANDLERS
// ==============================================================================

pub async fn issue_session_tokens(
    State(state): State<Arc<VideoState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester_for(&user)?;
    let grant = state.issuer.get_or_issue_tokens(session_id, &requester).await?;

    Ok(Json(json!({
        "success": true,
        "credential": grant
    })))
}

pub async fn join_session(
    State(state): State<Arc<VideoState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester_for(&user)?;
    let joined = state.issuer.join_session(session_id, &requester).await?;

    Ok(Json(json!({
        "success": true,
        "credential": joined.grant,
        "session": joined.session,
        "message": "Joined session"
    })))
}

pub async fn get_token_audit(
    State(state): State<Arc<VideoState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requester = requester_for(&user)?;
    let records = state.issuer.audit_trail(session_id, &requester).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "records": records,
        "total": records.len()
    })))
}
