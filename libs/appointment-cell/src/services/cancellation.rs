// libs/appointment-cell/src/services/cancellation.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::BusinessCalendar;
use crate::error::{SchedulingError, StoreError};
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    CancellationRequest, CreditSource, DeadlineClass, NewCancellation, Requester, RequesterRole,
    ReviewDecision, ReviewOutcome, ReviewStatus, Session, SessionStatus,
};
use crate::services::availability::SlotRegistry;
use crate::services::ledger::EntitlementLedgerService;
use crate::services::lifecycle::derive_status;
use crate::store::{CancellationStore, SessionStore};

#[derive(Debug, Clone, Copy)]
pub struct CancellationPolicy {
    pub notice: Duration,
    pub require_documents_when_late: bool,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            notice: Duration::hours(24),
            require_documents_when_late: true,
        }
    }
}

/// OnTime when the request arrives at least `notice` before the start.
pub fn classify_deadline(
    scheduled_at: DateTime<Utc>,
    requested_at: DateTime<Utc>,
    notice: Duration,
) -> DeadlineClass {
    if scheduled_at - requested_at >= notice {
        DeadlineClass::OnTime
    } else {
        DeadlineClass::Late
    }
}

/// `CANCEL-YYYYMMDD-XXXXXX`: business date plus the first six hex digits
/// of the request id.
pub fn protocol_number(request_id: Uuid, business_date: NaiveDate) -> String {
    let hex = request_id.simple().to_string().to_uppercase();
    format!("CANCEL-{}-{}", business_date.format("%Y%m%d"), &hex[..6])
}

pub struct CancellationService {
    store: Arc<dyn CancellationStore>,
    sessions: Arc<dyn SessionStore>,
    slots: Arc<SlotRegistry>,
    ledger: Arc<EntitlementLedgerService>,
    calendar: BusinessCalendar,
    events: Arc<EventBus>,
    policy: CancellationPolicy,
}

impl CancellationService {
    pub fn new(
        store: Arc<dyn CancellationStore>,
        sessions: Arc<dyn SessionStore>,
        slots: Arc<SlotRegistry>,
        ledger: Arc<EntitlementLedgerService>,
        calendar: BusinessCalendar,
        events: Arc<EventBus>,
        policy: CancellationPolicy,
    ) -> Self {
        Self { store, sessions, slots, ledger, calendar, events, policy }
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id))]
    pub async fn request_cancellation(
        &self,
        new: NewCancellation,
    ) -> Result<CancellationRequest, SchedulingError> {
        if new.reason.trim().is_empty() {
            return Err(SchedulingError::Validation("a reason is required".to_string()));
        }

        let session = self.load_session(new.session_id).await?;
        authorize_requester(&session, &new.requested_by)?;

        if new.force_majeure.is_some() && new.requested_by.role != RequesterRole::System {
            return Err(SchedulingError::Unauthorized(
                "force majeure can only be declared by the platform".to_string(),
            ));
        }

        let now = self.calendar.now();
        let status = derive_status(&session, now);
        if !status.is_cancellable() {
            return Err(SchedulingError::InvalidSessionState(status));
        }

        let scheduled_at = session.scheduled_at.ok_or_else(|| {
            SchedulingError::Integrity(format!("session {} has no start time", session.id))
        })?;
        let deadline = classify_deadline(scheduled_at, now, self.policy.notice);

        let needs_documents = deadline == DeadlineClass::Late
            && self.policy.require_documents_when_late
            && new.force_majeure.is_none()
            && !new.requested_by.is_staff();
        if needs_documents && new.documents.iter().all(|d| d.trim().is_empty()) {
            return Err(SchedulingError::DocumentsRequired);
        }

        if self.store.find_pending_for_session(session.id).await?.is_some() {
            return Err(SchedulingError::RequestAlreadyPending(session.id));
        }

        let id = Uuid::new_v4();
        let request = CancellationRequest {
            id,
            protocol: protocol_number(id, self.calendar.local_date(now)),
            session_id: session.id,
            requested_by: new.requested_by,
            reason: new.reason,
            documents: new.documents,
            deadline,
            force_majeure: new.force_majeure,
            status: ReviewStatus::PendingReview,
            created_at: now,
            reviewed_at: None,
            reviewed_by: None,
            review_note: None,
        };

        match self.store.insert_request(&request).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(SchedulingError::RequestAlreadyPending(session.id))
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Cancellation {} ({:?}) requested for session {}",
            request.protocol, deadline, session.id
        );
        self.events
            .emit(DomainEvent::CancellationRequested {
                request_id: request.id,
                session_id: session.id,
                protocol: request.protocol.clone(),
                deadline,
            })
            .await;

        if request.force_majeure.is_some() {
            let outcome = self
                .approve(request, Requester::system(), Some("force majeure".to_string()))
                .await?;
            return Ok(outcome.request);
        }

        Ok(request)
    }

    #[instrument(skip(self, note))]
    pub async fn review_cancellation(
        &self,
        request_id: Uuid,
        decision: ReviewDecision,
        reviewer: Requester,
        note: Option<String>,
    ) -> Result<ReviewOutcome, SchedulingError> {
        if !reviewer.is_staff() {
            return Err(SchedulingError::Unauthorized(
                "only administrators can review cancellations".to_string(),
            ));
        }

        let request = self.get_cancellation(request_id).await?;
        if request.status != ReviewStatus::PendingReview {
            return Err(SchedulingError::AlreadyReviewed(request.status));
        }

        match decision {
            ReviewDecision::Approved => self.approve(request, reviewer, note).await,
            ReviewDecision::Rejected => self.reject(request, reviewer, note).await,
        }
    }

    pub async fn get_cancellation(&self, request_id: Uuid) -> Result<CancellationRequest, SchedulingError> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or(SchedulingError::CancellationNotFound(request_id))
    }

    pub async fn list_pending_cancellations(&self) -> Result<Vec<CancellationRequest>, SchedulingError> {
        Ok(self
            .store
            .list_requests_by_status(ReviewStatus::PendingReview)
            .await?)
    }

    async fn reject(
        &self,
        request: CancellationRequest,
        reviewer: Requester,
        note: Option<String>,
    ) -> Result<ReviewOutcome, SchedulingError> {
        let now = self.calendar.now();
        let rejected = reviewed(&request, ReviewStatus::Rejected, reviewer, note, now);
        self.transition(&rejected, ReviewStatus::PendingReview).await?;

        let session = self.load_session(request.session_id).await?;
        info!("Cancellation {} rejected", request.protocol);
        self.events
            .emit(DomainEvent::CancellationRejected {
                request_id: request.id,
                session_id: request.session_id,
            })
            .await;

        Ok(ReviewOutcome {
            request: rejected,
            session_status: derive_status(&session, now),
            credited: None,
            slot_released: false,
        })
    }

    /// Approval runs as a sequence of conditional writes. A failure after
    /// the first write rolls the earlier ones back in reverse order.
    async fn approve(
        &self,
        request: CancellationRequest,
        reviewer: Requester,
        note: Option<String>,
    ) -> Result<ReviewOutcome, SchedulingError> {
        let now = self.calendar.now();
        let approved = reviewed(&request, ReviewStatus::Approved, reviewer, note, now);
        self.transition(&approved, ReviewStatus::PendingReview).await?;

        let session = match self.load_session(request.session_id).await {
            Ok(session) => session,
            Err(e) => {
                self.revert_request(&request).await;
                return Err(e);
            }
        };

        match self.sessions.mark_cancelled(session.id, request.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                self.revert_request(&request).await;
                return Err(SchedulingError::Integrity(format!(
                    "session {} already carries a cancellation",
                    session.id
                )));
            }
            Err(e) => {
                self.revert_request(&request).await;
                return Err(e.into());
            }
        }

        let credited = match self.ledger.credit_back(session.patient_id, session.credit_source).await {
            Ok(source) => source,
            Err(e) => {
                self.revert_session(&session, request.id).await;
                self.revert_request(&request).await;
                return Err(e);
            }
        };

        let started = session.scheduled_at.map(|start| now >= start).unwrap_or(false);
        let slot_released = if started {
            false
        } else {
            match self.slots.release_slot(session.slot_id, session.id).await {
                Ok(released) => released,
                Err(e) => {
                    self.revert_credit(&session, credited).await;
                    self.revert_session(&session, request.id).await;
                    self.revert_request(&request).await;
                    return Err(e);
                }
            }
        };

        info!(
            "Cancellation {} approved, session {} cancelled (slot released: {})",
            request.protocol, session.id, slot_released
        );
        self.events
            .emit(DomainEvent::CancellationApproved {
                request_id: request.id,
                session_id: session.id,
            })
            .await;
        self.events
            .emit(DomainEvent::SessionCancelled {
                session_id: session.id,
                patient_id: session.patient_id,
                psychologist_id: session.psychologist_id,
            })
            .await;

        Ok(ReviewOutcome {
            request: approved,
            session_status: SessionStatus::Cancelled,
            credited: Some(credited),
            slot_released,
        })
    }

    async fn transition(
        &self,
        updated: &CancellationRequest,
        expected: ReviewStatus,
    ) -> Result<(), SchedulingError> {
        if self.store.transition_request(updated, expected).await? {
            return Ok(());
        }
        let current = self.get_cancellation(updated.id).await?;
        Err(SchedulingError::AlreadyReviewed(current.status))
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Session, SchedulingError> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or(SchedulingError::SessionNotFound(session_id))
    }

    async fn revert_request(&self, original: &CancellationRequest) {
        let expected = ReviewStatus::Approved;
        if let Err(e) = self.store.transition_request(original, expected).await {
            error!("Could not restore cancellation {} to pending: {}", original.protocol, e);
        }
    }

    async fn revert_session(&self, session: &Session, request_id: Uuid) {
        if let Err(e) = self.sessions.clear_cancellation(session.id, request_id).await {
            error!("Could not clear cancellation marker on session {}: {}", session.id, e);
        }
    }

    async fn revert_credit(&self, session: &Session, credited: CreditSource) {
        if let Err(e) = self.ledger.revoke_credit(session.patient_id, credited).await {
            error!(
                "Could not revoke credit {:?} from patient {}: {}",
                credited, session.patient_id, e
            );
        }
    }
}

fn authorize_requester(session: &Session, requester: &Requester) -> Result<(), SchedulingError> {
    let allowed = match requester.role {
        RequesterRole::Patient => requester.user_id == session.patient_id,
        RequesterRole::Psychologist => requester.user_id == session.psychologist_id,
        RequesterRole::Admin | RequesterRole::System => true,
    };
    if allowed {
        Ok(())
    } else {
        warn!("Requester {} is not a participant of session {}", requester.user_id, session.id);
        Err(SchedulingError::Unauthorized(
            "only the session's participants may request its cancellation".to_string(),
        ))
    }
}

fn reviewed(
    request: &CancellationRequest,
    status: ReviewStatus,
    reviewer: Requester,
    note: Option<String>,
    now: DateTime<Utc>,
) -> CancellationRequest {
    CancellationRequest {
        status,
        reviewed_at: Some(now),
        reviewed_by: Some(reviewer.user_id),
        review_note: note,
        ..request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deadline_boundary_is_on_time() {
        let start = Utc.with_ymd_and_hms(2026, 7, 10, 15, 0, 0).unwrap();
        let notice = Duration::hours(24);

        assert_eq!(classify_deadline(start, start - Duration::hours(24), notice), DeadlineClass::OnTime);
        assert_eq!(
            classify_deadline(start, start - Duration::hours(23) - Duration::minutes(59), notice),
            DeadlineClass::Late
        );
        assert_eq!(classify_deadline(start, start + Duration::minutes(5), notice), DeadlineClass::Late);
    }

    #[test]
    fn protocol_uses_business_date_and_request_id() {
        let id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 9).unwrap();

        assert_eq!(protocol_number(id, date), "CANCEL-20260709-A1B2C3");
    }
}
