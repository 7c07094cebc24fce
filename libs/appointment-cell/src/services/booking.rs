// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::BusinessCalendar;
use crate::error::{ErrorKind, SchedulingError};
use crate::events::{DomainEvent, EventBus};
use crate::models::{Session, SlotStatus};
use crate::services::availability::SlotRegistry;
use crate::services::ledger::EntitlementLedgerService;
use crate::store::SessionStore;

/// Books a session as one unit: hold the slot, debit the ledger, persist
/// the session. A failure at any step undoes the steps before it.
pub struct BookingService {
    slots: Arc<SlotRegistry>,
    ledger: Arc<EntitlementLedgerService>,
    sessions: Arc<dyn SessionStore>,
    calendar: BusinessCalendar,
    events: Arc<EventBus>,
    session_duration_minutes: i64,
    step_timeout: StdDuration,
}

impl BookingService {
    pub fn new(
        slots: Arc<SlotRegistry>,
        ledger: Arc<EntitlementLedgerService>,
        sessions: Arc<dyn SessionStore>,
        calendar: BusinessCalendar,
        events: Arc<EventBus>,
        session_duration_minutes: i64,
        step_timeout: StdDuration,
    ) -> Self {
        Self {
            slots,
            ledger,
            sessions,
            calendar,
            events,
            session_duration_minutes,
            step_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn book(&self, patient_id: Uuid, slot_id: Uuid) -> Result<Session, SchedulingError> {
        info!("Booking slot {} for patient {}", slot_id, patient_id);

        // **Step 1: Slot exists, lies in the future and is open**
        let slot = self.bounded("load_slot", self.slots.get_slot(slot_id)).await?;
        let scheduled_at = self.calendar.to_utc(slot.date, slot.time)?;
        if scheduled_at <= self.calendar.now() {
            return Err(SchedulingError::SlotInPast(slot_id));
        }
        if slot.status != SlotStatus::Open {
            return Err(SchedulingError::SlotUnavailable(slot_id));
        }

        // **Step 2: Entitlement check before touching the slot**
        self.bounded("check_entitlement", self.ledger.preview_source(patient_id))
            .await?;

        // **Step 3: Hold the slot**
        let session_id = Uuid::new_v4();
        if let Err(e) = self
            .bounded("hold_slot", self.slots.hold_slot(slot_id, session_id))
            .await
        {
            if !matches!(e, SchedulingError::SlotUnavailable(_)) {
                self.release_hold(slot_id, session_id).await;
            }
            return Err(e);
        }

        // **Step 4: Debit one credit**
        let credit_source = match self
            .bounded("debit", self.ledger.debit(patient_id, session_id))
            .await
        {
            Ok(source) => source,
            Err(e) => {
                warn!("Debit failed for session {}: {}", session_id, e);
                if e.kind() == ErrorKind::Infrastructure {
                    self.refund(patient_id, session_id).await;
                }
                self.release_hold(slot_id, session_id).await;
                return Err(e);
            }
        };

        // **Step 5: Persist the session**
        let session = Session {
            id: session_id,
            slot_id,
            patient_id,
            psychologist_id: slot.psychologist_id,
            scheduled_at: Some(scheduled_at),
            duration_minutes: self.session_duration_minutes,
            credit_source,
            cancellation_id: None,
            cancelled_at: None,
            patient_joined_at: None,
            psychologist_joined_at: None,
            created_at: self.calendar.now(),
        };

        if let Err(e) = self
            .bounded("create_session", async {
                Ok(self.sessions.insert_session(&session).await?)
            })
            .await
        {
            warn!("Session {} could not be created: {}", session_id, e);
            if e.kind() == ErrorKind::Infrastructure {
                if let Err(discard) = self.sessions.discard_session(session_id).await {
                    error!("Could not discard session {}: {}", session_id, discard);
                }
            }
            self.refund(patient_id, session_id).await;
            self.release_hold(slot_id, session_id).await;
            return Err(e);
        }

        // Events go out only once the session is persisted
        self.events
            .emit(DomainEvent::SlotHeld {
                slot_id,
                psychologist_id: session.psychologist_id,
                session_id,
            })
            .await;
        self.events
            .emit(DomainEvent::SessionBooked {
                session_id,
                patient_id,
                psychologist_id: session.psychologist_id,
                scheduled_at: session.scheduled_at,
            })
            .await;

        info!("Session {} booked on slot {} for patient {}", session_id, slot_id, patient_id);
        Ok(session)
    }

    async fn bounded<T, F>(&self, step: &'static str, operation: F) -> Result<T, SchedulingError>
    where
        F: Future<Output = Result<T, SchedulingError>>,
    {
        match tokio::time::timeout(self.step_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(SchedulingError::Timeout {
                step,
                timeout_ms: u64::try_from(self.step_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn release_hold(&self, slot_id: Uuid, session_id: Uuid) {
        match self.slots.release_slot(slot_id, session_id).await {
            Ok(released) => debug!("Compensation released slot {}: {}", slot_id, released),
            Err(e) => error!(
                "Compensation failed, slot {} may stay held by {}: {}",
                slot_id, session_id, e
            ),
        }
    }

    async fn refund(&self, patient_id: Uuid, session_id: Uuid) {
        if let Err(e) = self.ledger.refund_debit(patient_id, session_id).await {
            error!(
                "Compensation failed, patient {} may stay debited for session {}: {}",
                patient_id, session_id, e
            );
        }
    }
}
