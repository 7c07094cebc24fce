// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, SchedulingState};

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    // Every scheduling operation requires authentication
    let protected_routes = Router::new()
        // Availability
        .route("/availability", post(handlers::declare_availability))
        .route("/availability/{psychologist_id}", get(handlers::list_availability))
        .route("/availability/{psychologist_id}/generate", post(handlers::generate_availability))
        .route("/slots/{slot_id}/block", post(handlers::block_slot))
        .route("/slots/{slot_id}/unblock", post(handlers::unblock_slot))
        // Sessions
        .route("/sessions", post(handlers::book_session))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}/status", get(handlers::get_session_status))
        .route("/sessions/{session_id}/cancellations", post(handlers::request_cancellation))
        .route("/patients/{patient_id}/sessions", get(handlers::list_patient_sessions))
        .route("/patients/{patient_id}/sessions/next", get(handlers::next_patient_session))
        .route("/psychologists/{psychologist_id}/sessions", get(handlers::list_psychologist_sessions))
        .route("/psychologists/{psychologist_id}/sessions/next", get(handlers::next_psychologist_session))
        // Cancellation review (admin)
        .route("/cancellations/pending", get(handlers::list_pending_cancellations))
        .route("/cancellations/{request_id}", get(handlers::get_cancellation))
        .route("/cancellations/{request_id}/review", post(handlers::review_cancellation))
        // Entitlement ledger
        .route("/ledgers/{patient_id}", get(handlers::get_ledger))
        .route("/ledgers/{patient_id}/payment-confirmed", post(handlers::confirm_payment))
        .route("/ledgers/{patient_id}/payment-pending", post(handlers::mark_payment_pending))
        .route("/ledgers/{patient_id}/cycles", post(handlers::grant_cycle))
        .route("/ledgers/{patient_id}/credits", post(handlers::grant_one_off))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
