mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Path, State},
    http::{header, Method, Request, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::handlers::{self, SchedulingState};
use appointment_cell::models::{
    BookSessionRequest, CreateCancellationRequest, ReviewCancellationRequest, ReviewDecision,
};
use appointment_cell::router::scheduling_routes;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestUser};

use common::Harness;

fn state_for(harness: &Harness) -> Arc<SchedulingState> {
    Arc::new(SchedulingState::new(
        Arc::new(harness.config.clone()),
        harness.engine.clone(),
    ))
}

fn as_user(id: Uuid, role: &str) -> Extension<User> {
    Extension(TestUser::with_id(id, &format!("{}@example.com", role), role).to_user())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn patient_books_for_themselves() {
    let harness = Harness::new();
    let slot = harness.open_slot(2, 10).await;
    let patient_id = harness.patient_with_cycle(2).await;

    let Json(body) = handlers::book_session(
        State(state_for(&harness)),
        as_user(patient_id, "patient"),
        Json(BookSessionRequest { patient_id, slot_id: slot.id }),
    )
    .await
    .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["session"]["slot_id"], json!(slot.id));
    assert_eq!(body["session"]["status"]["state"], "reserved");
}

#[tokio::test]
async fn booking_for_someone_else_is_forbidden() {
    let harness = Harness::new();
    let slot = harness.open_slot(2, 10).await;
    let patient_id = harness.patient_with_cycle(2).await;

    let result = handlers::book_session(
        State(state_for(&harness)),
        as_user(Uuid::new_v4(), "patient"),
        Json(BookSessionRequest { patient_id, slot_id: slot.id }),
    )
    .await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn cancellation_review_requires_staff() {
    let harness = Harness::new();
    let state = state_for(&harness);
    let slot = harness.open_slot(3, 10).await;
    let patient_id = harness.patient_with_cycle(2).await;
    let session = harness.engine.booking.book(patient_id, slot.id).await.unwrap();

    let Json(created) = handlers::request_cancellation(
        State(state.clone()),
        as_user(patient_id, "patient"),
        Path(session.id),
        Json(CreateCancellationRequest {
            reason: "schedule conflict".to_string(),
            documents: vec![],
            force_majeure: None,
        }),
    )
    .await
    .unwrap();
    let request_id: Uuid = serde_json::from_value(created["cancellation"]["id"].clone()).unwrap();
    assert!(created["protocol"].as_str().unwrap().starts_with("CANCEL-"));

    let by_patient = handlers::review_cancellation(
        State(state.clone()),
        as_user(patient_id, "patient"),
        Path(request_id),
        Json(ReviewCancellationRequest { decision: ReviewDecision::Approved, note: None }),
    )
    .await;
    assert_matches!(by_patient, Err(AppError::Forbidden(_)));

    let Json(reviewed) = handlers::review_cancellation(
        State(state),
        as_user(Uuid::new_v4(), "admin"),
        Path(request_id),
        Json(ReviewCancellationRequest { decision: ReviewDecision::Approved, note: None }),
    )
    .await
    .unwrap();
    assert_eq!(reviewed["outcome"]["request"]["status"], "approved");
    assert_eq!(reviewed["outcome"]["slot_released"], true);
}

#[tokio::test]
async fn other_patients_cannot_read_a_session() {
    let harness = Harness::new();
    let slot = harness.open_slot(1, 10).await;
    let patient_id = harness.patient_with_cycle(1).await;
    let session = harness.engine.booking.book(patient_id, slot.id).await.unwrap();

    let result = handlers::get_session(
        State(state_for(&harness)),
        as_user(Uuid::new_v4(), "patient"),
        Path(session.id),
    )
    .await;
    assert_matches!(result, Err(AppError::Forbidden(_)));

    let Json(body) = handlers::get_session(
        State(state_for(&harness)),
        as_user(harness.psychologist_id, "psychologist"),
        Path(session.id),
    )
    .await
    .unwrap();
    assert_eq!(body["id"], json!(session.id));
}

#[tokio::test]
async fn routes_require_a_bearer_token() {
    let harness = Harness::new();
    let app = scheduling_routes(state_for(&harness));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/ledgers/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn booking_through_the_router() {
    let harness = Harness::new();
    let slot = harness.open_slot(2, 9).await;
    let patient_id = harness.patient_with_cycle(1).await;
    let patient = TestUser::with_id(patient_id, "patient@example.com", "patient");
    let token = JwtTestUtils::bearer(&patient, &harness.config.supabase_jwt_secret);

    let book = |slot_id: Uuid| {
        Request::builder()
            .method(Method::POST)
            .uri("/sessions")
            .header(header::AUTHORIZATION, token.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "patient_id": patient_id, "slot_id": slot_id }).to_string(),
            ))
            .unwrap()
    };

    let app = scheduling_routes(state_for(&harness));
    let response = app.clone().oneshot(book(slot.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["session"]["patient_id"], json!(patient_id));

    // The single credit is spent now.
    let other = harness.open_slot(2, 10).await;
    let response = app.clone().oneshot(book(other.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // The first slot is taken.
    let response = app.oneshot(book(slot.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn ledger_summary_through_the_router() {
    let harness = Harness::new();
    let patient_id = harness.patient_with_one_off(2).await;
    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::bearer(&admin, &harness.config.supabase_jwt_secret);

    let response = scheduling_routes(state_for(&harness))
        .oneshot(
            Request::builder()
                .uri(format!("/ledgers/{}", patient_id))
                .header(header::AUTHORIZATION, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["one_off_credits_available"], 2);
    assert_eq!(body["total_available"], 2);
}

#[tokio::test]
async fn next_session_is_private_to_its_participants() {
    let harness = Harness::new();
    let slot = harness.open_slot(1, 10).await;
    let patient_id = harness.patient_with_cycle(1).await;
    let session = harness.engine.booking.book(patient_id, slot.id).await.unwrap();

    let result = handlers::next_patient_session(
        State(state_for(&harness)),
        as_user(Uuid::new_v4(), "patient"),
        Path(patient_id),
    )
    .await;
    assert_matches!(result, Err(AppError::Forbidden(_)));

    let Json(body) = handlers::next_patient_session(
        State(state_for(&harness)),
        as_user(patient_id, "patient"),
        Path(patient_id),
    )
    .await
    .unwrap();
    assert_eq!(body["session"]["id"], json!(session.id));

    let idle_psychologist = Uuid::new_v4();
    let Json(body) = handlers::next_psychologist_session(
        State(state_for(&harness)),
        as_user(idle_psychologist, "psychologist"),
        Path(idle_psychologist),
    )
    .await
    .unwrap();
    assert!(body["session"].is_null());
}
