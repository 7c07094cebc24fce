use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::clock::{Clock, ManualClock};
use appointment_cell::models::{ParticipantRole, Session};
use appointment_cell::SchedulingEngine;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use video_conferencing_cell::models::{AccessCredential, SessionCredentials};
use video_conferencing_cell::store::{AccessTokenStore, InMemoryTokenStore, SupabaseTokenStore};
use video_conferencing_cell::{
    video_conferencing_routes, AccessTokenIssuer, CredentialMinter, VideoState,
};

struct App {
    router: Router,
    clock: Arc<ManualClock>,
    config: AppConfig,
    session: Session,
}

impl App {
    async fn new() -> Self {
        let config = TestConfig::default().to_app_config();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()));
        let engine = SchedulingEngine::in_memory(&config, clock.clone() as Arc<dyn Clock>);

        let psychologist_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        let slot = engine
            .slots
            .declare_availability(
                psychologist_id,
                engine.calendar.today() + Duration::days(2),
                &[NaiveTime::from_hms_opt(10, 0, 0).unwrap()],
                false,
            )
            .await
            .unwrap()
            .remove(0);
        engine
            .ledger
            .grant_one_off(patient_id, clock.now() + Duration::days(30), 1)
            .await
            .unwrap();
        let session = engine.booking.book(patient_id, slot.id).await.unwrap();

        let issuer = AccessTokenIssuer::new(
            Arc::new(InMemoryTokenStore::new()),
            engine.lifecycle.clone(),
            engine.events.clone(),
            Some(CredentialMinter::from_config(&config).unwrap()),
        );
        let state = Arc::new(VideoState::new(Arc::new(config.clone()), Arc::new(issuer)));

        Self {
            router: video_conferencing_routes(state),
            clock,
            config,
            session,
        }
    }

    fn start(&self) -> DateTime<Utc> {
        self.session.scheduled_at.unwrap()
    }

    fn bearer(&self, id: Uuid, role: &str) -> String {
        let user = TestUser::with_id(id, &format!("{}@example.com", role), role);
        JwtTestUtils::bearer(&user, &self.config.supabase_jwt_secret)
    }

    async fn call(&self, method: Method, uri: String, bearer: Option<String>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(bearer) = bearer {
            request = request.header(header::AUTHORIZATION, bearer);
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = App::new().await;
    let (status, body) = app.call(Method::GET, "/health".to_string(), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn token_endpoint_follows_the_session_window() {
    let app = App::new().await;
    let uri = format!("/sessions/{}/tokens", app.session.id);
    let patient = app.bearer(app.session.patient_id, "patient");

    let (status, _) = app.call(Method::POST, uri.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.clock.set(app.start() - Duration::hours(1));
    let (status, _) = app.call(Method::POST, uri.clone(), Some(patient.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.clock.set(app.start() + Duration::minutes(2));
    let (status, body) = app.call(Method::POST, uri.clone(), Some(patient.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credential"]["role"], "patient");
    assert_eq!(body["credential"]["first_issue"], true);

    let stranger = app.bearer(Uuid::new_v4(), "patient");
    let (status, _) = app.call(Method::POST, uri, Some(stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn join_and_audit_endpoints() {
    let app = App::new().await;
    app.clock.set(app.start() + Duration::minutes(2));

    let psychologist = app.bearer(app.session.psychologist_id, "psychologist");
    let (status, body) = app
        .call(
            Method::POST,
            format!("/sessions/{}/join", app.session.id),
            Some(psychologist.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credential"]["role"], "psychologist");
    assert!(body["session"]["psychologist_joined_at"].is_string());

    let audit = format!("/sessions/{}/audit", app.session.id);
    let (status, _) = app.call(Method::GET, audit.clone(), Some(psychologist)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.bearer(Uuid::new_v4(), "admin");
    let (status, body) = app.call(Method::GET, audit, Some(admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert!(body["records"][0].get("token").is_none());
}

fn credentials_for(session_id: Uuid, token: &str) -> SessionCredentials {
    let expires_at = Utc.with_ymd_and_hms(2026, 3, 4, 14, 0, 0).unwrap();
    let credential = |role: ParticipantRole, uid: u32| AccessCredential {
        role,
        uid,
        token: format!("{}-{}", token, uid),
        expires_at,
    };
    SessionCredentials {
        session_id,
        channel: CredentialMinter::channel_for(session_id),
        app_id: "test-app".to_string(),
        patient: credential(ParticipantRole::Patient, 1),
        psychologist: credential(ParticipantRole::Psychologist, 2),
        issued_at: expires_at - Duration::minutes(50),
        expires_at,
    }
}

#[tokio::test]
async fn supabase_store_keeps_the_first_credential_set() {
    let server = MockServer::start().await;
    let session_id = Uuid::new_v4();
    let existing = credentials_for(session_id, "first");

    // Duplicate insert is ignored: nothing comes back.
    Mock::given(method("POST"))
        .and(path("/rest/v1/session_credentials"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/session_credentials"))
        .and(query_param("session_id", format!("eq.{}", session_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .mount(&server)
        .await;

    let config = AppConfig {
        supabase_url: server.uri(),
        ..TestConfig::default().to_app_config()
    };
    let store = SupabaseTokenStore::new(&config);

    let stored = store
        .insert_if_absent(credentials_for(session_id, "second"))
        .await
        .unwrap();
    assert_eq!(stored, existing);
}
