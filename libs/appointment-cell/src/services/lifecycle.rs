// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SchedulingError;
use crate::models::{AccessWindow, Attendance, ParticipantRole, Session, SessionStatus, SessionView};
use crate::store::SessionStore;

/// Start and end of the period in which participants may join.
pub fn access_window(session: &Session) -> Option<AccessWindow> {
    let starts_at = session.scheduled_at?;
    if session.duration_minutes <= 0 {
        return None;
    }
    Some(AccessWindow {
        starts_at,
        ends_at: starts_at + Duration::minutes(session.duration_minutes),
    })
}

pub fn attendance(session: &Session) -> Attendance {
    match (session.patient_joined_at, session.psychologist_joined_at) {
        (Some(_), Some(_)) => Attendance::Attended,
        (None, Some(_)) => Attendance::PatientNoShow,
        (Some(_), None) => Attendance::PsychologistNoShow,
        (None, None) => Attendance::Unrecorded,
    }
}

/// Status as a pure function of the session and `now`. An approved
/// cancellation wins over any time-based state.
pub fn try_derive_status(session: &Session, now: DateTime<Utc>) -> Result<SessionStatus, SchedulingError> {
    if session.cancellation_id.is_some() {
        return Ok(SessionStatus::Cancelled);
    }

    let window = access_window(session).ok_or_else(|| {
        SchedulingError::Integrity(format!(
            "session {} has no usable start time or duration",
            session.id
        ))
    })?;

    Ok(if now < window.starts_at {
        SessionStatus::Reserved
    } else if now < window.ends_at {
        SessionStatus::InProgress
    } else {
        SessionStatus::Completed { attendance: attendance(session) }
    })
}

/// Like `try_derive_status`, but a session with missing timing data is
/// reported as Reserved so that it can never be joined.
pub fn derive_status(session: &Session, now: DateTime<Utc>) -> SessionStatus {
    try_derive_status(session, now).unwrap_or_else(|e| {
        error!("Failing closed to reserved: {}", e);
        SessionStatus::Reserved
    })
}

/// Earliest session that is still reserved or in progress at `now`.
/// Sessions without a start time are never chosen.
pub fn next_session(sessions: Vec<Session>, now: DateTime<Utc>) -> Option<Session> {
    sessions
        .into_iter()
        .filter(|s| s.scheduled_at.is_some())
        .filter(|s| {
            matches!(
                derive_status(s, now),
                SessionStatus::Reserved | SessionStatus::InProgress
            )
        })
        .min_by_key(|s| s.scheduled_at)
}

pub struct SessionLifecycleService {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SessionLifecycleService {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn view(&self, session: Session) -> SessionView {
        let status = derive_status(&session, self.clock.now());
        let access_window = access_window(&session);
        SessionView { session, status, access_window }
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, SchedulingError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(SchedulingError::SessionNotFound(session_id))
    }

    pub async fn get_session_view(&self, session_id: Uuid) -> Result<SessionView, SchedulingError> {
        let session = self.get_session(session_id).await?;
        Ok(self.view(session))
    }

    #[instrument(skip(self))]
    pub async fn get_session_status(&self, session_id: Uuid) -> Result<SessionStatus, SchedulingError> {
        let session = self.get_session(session_id).await?;
        let status = derive_status(&session, self.clock.now());
        debug!("Session {} is {}", session_id, status);
        Ok(status)
    }

    pub async fn list_patient_sessions(&self, patient_id: Uuid) -> Result<Vec<SessionView>, SchedulingError> {
        let sessions = self.store.list_patient_sessions(patient_id).await?;
        Ok(sessions.into_iter().map(|s| self.view(s)).collect())
    }

    pub async fn list_psychologist_sessions(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<SessionView>, SchedulingError> {
        let sessions = self.store.list_psychologist_sessions(psychologist_id).await?;
        Ok(sessions.into_iter().map(|s| self.view(s)).collect())
    }

    pub async fn next_session_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Option<SessionView>, SchedulingError> {
        let sessions = self.store.list_patient_sessions(patient_id).await?;
        Ok(next_session(sessions, self.clock.now()).map(|s| self.view(s)))
    }

    pub async fn next_session_for_psychologist(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Option<SessionView>, SchedulingError> {
        let sessions = self.store.list_psychologist_sessions(psychologist_id).await?;
        Ok(next_session(sessions, self.clock.now()).map(|s| self.view(s)))
    }

    /// Records a participant's first join. Only possible while the session
    /// is in progress.
    #[instrument(skip(self))]
    pub async fn record_join(
        &self,
        session_id: Uuid,
        role: ParticipantRole,
    ) -> Result<SessionView, SchedulingError> {
        let session = self.get_session(session_id).await?;
        let now = self.clock.now();
        match derive_status(&session, now) {
            SessionStatus::InProgress => {}
            SessionStatus::Reserved => return Err(SchedulingError::NotYetStartable),
            SessionStatus::Completed { .. } | SessionStatus::Cancelled => {
                return Err(SchedulingError::WindowClosed)
            }
        }

        if self.store.record_join(session_id, role, now).await? {
            info!("{} joined session {}", role, session_id);
        }
        self.get_session_view(session_id).await
    }
}
