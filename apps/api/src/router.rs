use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::scheduling_routes;
use appointment_cell::SchedulingState;
use video_conferencing_cell::{video_conferencing_routes, VideoState};

pub fn create_router(scheduling: Arc<SchedulingState>, video: Arc<VideoState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Scheduling API is running!" }))
        .nest("/scheduling", scheduling_routes(scheduling))
        .nest("/video", video_conferencing_routes(video))
}
