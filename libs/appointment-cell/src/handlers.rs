// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{User, UserRole};
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;

use crate::engine::SchedulingEngine;
use crate::models::{
    AvailabilityQuery, BookSessionRequest, CreateCancellationRequest, DeclareAvailabilityRequest,
    GrantCycleRequest, GrantOneOffRequest, NewCancellation, Requester, RequesterRole,
    ReviewCancellationRequest, Session,
};

/// Shared router state: configuration for the auth layer plus the engine.
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<SchedulingEngine>,
}

impl SchedulingState {
    pub fn new(config: Arc<AppConfig>, engine: Arc<SchedulingEngine>) -> Self {
        Self { config, engine }
    }
}

// ==============================================================================
// AUTHORIZATION HELPERS
// ==============================================================================

pub fn requester_for(user: &User) -> Result<Requester, AppError> {
    let role = match user.user_role() {
        UserRole::Patient => RequesterRole::Patient,
        UserRole::Psychologist => RequesterRole::Psychologist,
        UserRole::Admin => RequesterRole::Admin,
        UserRole::System => RequesterRole::System,
        UserRole::Unknown => {
            return Err(AppError::Forbidden("Role not allowed to use scheduling".to_string()))
        }
    };
    let user_id = match (user.uuid(), role) {
        (Some(id), _) => id,
        (None, RequesterRole::System) => Uuid::nil(),
        (None, _) => return Err(AppError::Auth("Token subject is not a valid user id".to_string())),
    };
    Ok(Requester::new(user_id, role))
}

fn ensure_self_or_staff(user: &User, owner_id: Uuid) -> Result<(), AppError> {
    if user.is(owner_id) || user.user_role().is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to act for this user".to_string()))
    }
}

fn ensure_participant_or_staff(user: &User, session: &Session) -> Result<(), AppError> {
    if user.is(session.patient_id) || user.is(session.psychologist_id) || user.user_role().is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to access this session".to_string()))
    }
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

pub async fn list_availability(
    State(state): State<Arc<SchedulingState>>,
    Path(psychologist_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let entries = state
        .engine
        .slots
        .list_availability(psychologist_id, query.from, query.to)
        .await?;

    Ok(Json(json!({
        "psychologist_id": psychologist_id,
        "from": query.from,
        "to": query.to,
        "slots": entries,
        "total": entries.len()
    })))
}

pub async fn declare_availability(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<DeclareAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, request.psychologist_id)?;
    if request.times.is_empty() {
        return Err(AppError::BadRequest("At least one time is required".to_string()));
    }

    let created = state
        .engine
        .slots
        .declare_availability(request.psychologist_id, request.date, &request.times, request.recurring)
        .await?;

    Ok(Json(json!({
        "success": true,
        "created": created.len(),
        "slots": created
    })))
}

pub async fn generate_availability(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(psychologist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, psychologist_id)?;

    let rolling = state.engine.slots.generate_rolling_availability(psychologist_id).await?;
    let recurring = state.engine.slots.regenerate_recurring(psychologist_id).await?;

    Ok(Json(json!({
        "success": true,
        "rolling_created": rolling.len(),
        "recurring_created": recurring.len()
    })))
}

pub async fn block_slot(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.engine.slots.get_slot(slot_id).await?;
    ensure_self_or_staff(&user, slot.psychologist_id)?;

    let slot = state.engine.slots.block_slot(slot_id).await?;
    Ok(Json(json!({ "success": true, "slot": slot })))
}

pub async fn unblock_slot(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.engine.slots.get_slot(slot_id).await?;
    ensure_self_or_staff(&user, slot.psychologist_id)?;

    let slot = state.engine.slots.unblock_slot(slot_id).await?;
    Ok(Json(json!({ "success": true, "slot": slot })))
}

// ==============================================================================
// SESSION HANDLERS
// ==============================================================================

pub async fn book_session(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookSessionRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, request.patient_id)?;

    let session = state.engine.booking.book(request.patient_id, request.slot_id).await?;
    let view = state.engine.lifecycle.view(session);

    Ok(Json(json!({
        "success": true,
        "session": view,
        "message": "Session booked"
    })))
}

pub async fn get_session(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let view = state.engine.lifecycle.get_session_view(session_id).await?;
    ensure_participant_or_staff(&user, &view.session)?;

    Ok(Json(json!(view)))
}

pub async fn get_session_status(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let view = state.engine.lifecycle.get_session_view(session_id).await?;
    ensure_participant_or_staff(&user, &view.session)?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": view.status,
        "access_window": view.access_window
    })))
}

pub async fn list_patient_sessions(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, patient_id)?;

    let sessions = state.engine.lifecycle.list_patient_sessions(patient_id).await?;
    Ok(Json(json!({ "sessions": sessions, "total": sessions.len() })))
}

pub async fn list_psychologist_sessions(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(psychologist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, psychologist_id)?;

    let sessions = state
        .engine
        .lifecycle
        .list_psychologist_sessions(psychologist_id)
        .await?;
    Ok(Json(json!({ "sessions": sessions, "total": sessions.len() })))
}

pub async fn next_patient_session(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, patient_id)?;

    let next = state.engine.lifecycle.next_session_for_patient(patient_id).await?;
    Ok(Json(json!({ "session": next })))
}

pub async fn next_psychologist_session(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(psychologist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, psychologist_id)?;

    let next = state
        .engine
        .lifecycle
        .next_session_for_psychologist(psychologist_id)
        .await?;
    Ok(Json(json!({ "session": next })))
}

// ==============================================================================
// CANCELLATION HANDLERS
// ==============================================================================

pub async fn request_cancellation(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CreateCancellationRequest>,
) -> Result<Json<Value>, AppError> {
    let requester = requester_for(&user)?;

    let cancellation = state
        .engine
        .cancellations
        .request_cancellation(NewCancellation {
            session_id,
            requested_by: requester,
            reason: request.reason,
            documents: request.documents,
            force_majeure: request.force_majeure,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "cancellation": cancellation,
        "protocol": cancellation.protocol
    })))
}

pub async fn list_pending_cancellations(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let pending = state.engine.cancellations.list_pending_cancellations().await?;
    Ok(Json(json!({ "cancellations": pending, "total": pending.len() })))
}

pub async fn get_cancellation(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let cancellation = state.engine.cancellations.get_cancellation(request_id).await?;
    if !user.user_role().is_staff() {
        let session = state.engine.lifecycle.get_session(cancellation.session_id).await?;
        ensure_participant_or_staff(&user, &session)?;
    }

    Ok(Json(json!(cancellation)))
}

pub async fn review_cancellation(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<ReviewCancellationRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let reviewer = requester_for(&user)?;

    let outcome = state
        .engine
        .cancellations
        .review_cancellation(request_id, request.decision, reviewer, request.note)
        .await?;

    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

// ==============================================================================
// LEDGER HANDLERS
// ==============================================================================

pub async fn get_ledger(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, patient_id)?;

    let summary = state.engine.ledger.ledger_summary(patient_id).await?;
    Ok(Json(json!(summary)))
}

pub async fn confirm_payment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let summary = state.engine.ledger.confirm_payment(patient_id).await?;
    Ok(Json(json!({ "success": true, "ledger": summary })))
}

pub async fn mark_payment_pending(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let summary = state.engine.ledger.mark_payment_pending(patient_id).await?;
    Ok(Json(json!({ "success": true, "ledger": summary })))
}

pub async fn grant_cycle(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<GrantCycleRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let summary = state
        .engine
        .ledger
        .grant_cycle(patient_id, request.starts_at, request.ends_at, request.total_credits)
        .await?;
    Ok(Json(json!({ "success": true, "ledger": summary })))
}

pub async fn grant_one_off(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<GrantOneOffRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let summary = state
        .engine
        .ledger
        .grant_one_off(patient_id, request.valid_until, request.quantity)
        .await?;
    Ok(Json(json!({ "success": true, "ledger": summary })))
}
