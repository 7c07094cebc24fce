// libs/video-conferencing-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, VideoState};

pub fn video_conferencing_routes(state: Arc<VideoState>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::video_health_check));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/sessions/{session_id}/tokens", post(handlers::issue_session_tokens))
        .route("/sessions/{session_id}/join", post(handlers::join_session))
        .route("/sessions/{session_id}/audit", get(handlers::get_token_audit))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
