use assert_matches::assert_matches;
use chrono::{NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    CancellationRequest, DeadlineClass, EntitlementLedger, Requester, RequesterRole, ReviewStatus,
    SlotStatus,
};
use appointment_cell::store::{CancellationStore, LedgerStore, SessionStore, SlotStore, SupabaseStore};
use appointment_cell::StoreError;
use shared_config::{AppConfig, StorageBackend};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseStore {
    let config = AppConfig {
        supabase_url: server.uri(),
        storage_backend: StorageBackend::Supabase,
        ..TestConfig::default().to_app_config()
    };
    SupabaseStore::new(&config)
}

#[tokio::test]
async fn slot_rows_are_decoded() {
    let server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let psychologist_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(slot_id, psychologist_id, "2026-03-04", "10:00:00", "open")
        ])))
        .mount(&server)
        .await;

    let slot = store_for(&server).get_slot(slot_id).await.unwrap().unwrap();

    assert_eq!(slot.psychologist_id, psychologist_id);
    assert_eq!(slot.status, SlotStatus::Open);
    assert_eq!(slot.time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    assert_eq!(slot.held_by, None);
}

#[tokio::test]
async fn hold_guard_miss_reports_false() {
    let server = MockServer::start().await;
    let slot_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("status", "eq.open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let held = store_for(&server).try_hold(slot_id, Uuid::new_v4()).await.unwrap();
    assert!(!held);
}

#[tokio::test]
async fn first_ledger_insert_losing_the_race_reports_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/entitlement_ledgers"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(MockSupabaseResponses::error_response("duplicate key", "23505")),
        )
        .mount(&server)
        .await;

    let ledger = EntitlementLedger::empty(Uuid::new_v4(), Utc::now());
    let saved = store_for(&server).save_ledger(&ledger, None).await.unwrap();
    assert!(!saved);
}

#[tokio::test]
async fn versioned_ledger_save_filters_on_version() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/entitlement_ledgers"))
        .and(query_param("version", "eq.3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([MockSupabaseResponses::ledger_row(patient_id, 4, false)])),
        )
        .mount(&server)
        .await;

    let mut ledger = EntitlementLedger::empty(patient_id, Utc::now());
    ledger.version = 4;
    assert!(store_for(&server).save_ledger(&ledger, Some(3)).await.unwrap());
}

#[tokio::test]
async fn malformed_start_time_degrades_to_none() {
    let server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::session_row(
                session_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Some("next tuesday"),
            )
        ])))
        .mount(&server)
        .await;

    let session = store_for(&server).get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.id, session_id);
    assert_eq!(session.scheduled_at, None);
}

#[tokio::test]
async fn undecodable_row_is_corrupt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "not-a-uuid" }])))
        .mount(&server)
        .await;

    assert_matches!(
        store_for(&server).get_slot(Uuid::new_v4()).await,
        Err(StoreError::Corrupt(_))
    );
}

#[tokio::test]
async fn second_pending_request_is_a_duplicate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/cancellation_requests"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(MockSupabaseResponses::error_response("duplicate key", "23505")),
        )
        .mount(&server)
        .await;

    let request = CancellationRequest {
        id: Uuid::new_v4(),
        protocol: "CANCEL-20260302-ABCDEF".to_string(),
        session_id: Uuid::new_v4(),
        requested_by: Requester::new(Uuid::new_v4(), RequesterRole::Patient),
        reason: "sick".to_string(),
        documents: vec![],
        deadline: DeadlineClass::OnTime,
        force_majeure: None,
        status: ReviewStatus::PendingReview,
        created_at: Utc::now(),
        reviewed_at: None,
        reviewed_by: None,
        review_note: None,
    };

    assert_matches!(
        store_for(&server).insert_request(&request).await,
        Err(StoreError::Duplicate(_))
    );
}

#[tokio::test]
async fn server_errors_surface_as_backend_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/sessions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert_matches!(
        store_for(&server).list_patient_sessions(Uuid::new_v4()).await,
        Err(StoreError::Backend(_))
    );
}
