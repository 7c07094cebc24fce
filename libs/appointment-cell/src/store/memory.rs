use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    CancellationRequest, EntitlementLedger, ParticipantRole, ReviewStatus, Session, Slot,
    SlotKey, SlotStatus,
};

use super::{CancellationStore, LedgerStore, SessionStore, SlotStore};

#[derive(Default)]
struct SlotTable {
    by_id: HashMap<Uuid, Slot>,
    keys: HashSet<SlotKey>,
}

/// Process-local backend. Each table sits behind its own lock and every
/// conditional write happens under the write guard.
#[derive(Default)]
pub struct InMemoryStore {
    slots: RwLock<SlotTable>,
    ledgers: RwLock<HashMap<Uuid, EntitlementLedger>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
    cancellations: RwLock<HashMap<Uuid, CancellationRequest>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for InMemoryStore {
    async fn insert_slots(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, StoreError> {
        let mut table = self.slots.write().await;
        let mut inserted = Vec::with_capacity(slots.len());
        for slot in slots {
            if table.keys.insert(slot.key()) {
                table.by_id.insert(slot.id, slot.clone());
                inserted.push(slot);
            }
        }
        Ok(inserted)
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.slots.read().await.by_id.get(&slot_id).cloned())
    }

    async fn list_slots(
        &self,
        psychologist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        let table = self.slots.read().await;
        let mut slots: Vec<Slot> = table
            .by_id
            .values()
            .filter(|s| s.psychologist_id == psychologist_id && s.date >= from && s.date <= to)
            .cloned()
            .collect();
        slots.sort_by_key(|s| (s.date, s.time));
        Ok(slots)
    }

    async fn try_hold(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        let mut table = self.slots.write().await;
        match table.by_id.get_mut(&slot_id) {
            Some(slot) if slot.status == SlotStatus::Open => {
                slot.status = SlotStatus::Held;
                slot.held_by = Some(holder);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        let mut table = self.slots.write().await;
        match table.by_id.get_mut(&slot_id) {
            Some(slot) if slot.status == SlotStatus::Held && slot.held_by == Some(holder) => {
                slot.status = SlotStatus::Open;
                slot.held_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_blocked(&self, slot_id: Uuid, blocked: bool) -> Result<bool, StoreError> {
        let (expected, next) = if blocked {
            (SlotStatus::Open, SlotStatus::Blocked)
        } else {
            (SlotStatus::Blocked, SlotStatus::Open)
        };
        let mut table = self.slots.write().await;
        match table.by_id.get_mut(&slot_id) {
            Some(slot) if slot.status == expected => {
                slot.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn load_ledger(&self, patient_id: Uuid) -> Result<Option<EntitlementLedger>, StoreError> {
        Ok(self.ledgers.read().await.get(&patient_id).cloned())
    }

    async fn save_ledger(
        &self,
        ledger: &EntitlementLedger,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut ledgers = self.ledgers.write().await;
        let current = ledgers.get(&ledger.patient_id).map(|l| l.version);
        if current != expected_version {
            return Ok(false);
        }
        ledgers.insert(ledger.patient_id, ledger.clone());
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(format!("session {}", session.id)));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn list_patient_sessions(&self, patient_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.scheduled_at);
        Ok(matching)
    }

    async fn list_psychologist_sessions(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| s.psychologist_id == psychologist_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.scheduled_at);
        Ok(matching)
    }

    async fn mark_cancelled(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.cancellation_id.is_none() => {
                session.cancellation_id = Some(cancellation_id);
                session.cancelled_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn clear_cancellation(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.cancellation_id == Some(cancellation_id) => {
                session.cancellation_id = None;
                session.cancelled_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_join(
        &self,
        session_id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        let joined_at = match role {
            ParticipantRole::Patient => &mut session.patient_joined_at,
            ParticipantRole::Psychologist => &mut session.psychologist_joined_at,
        };
        if joined_at.is_some() {
            return Ok(false);
        }
        *joined_at = Some(at);
        Ok(true)
    }

    async fn discard_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.sessions.write().await.remove(&session_id);
        Ok(())
    }
}

#[async_trait]
impl CancellationStore for InMemoryStore {
    async fn insert_request(&self, request: &CancellationRequest) -> Result<(), StoreError> {
        let mut requests = self.cancellations.write().await;
        let pending_exists = requests.values().any(|r| {
            r.session_id == request.session_id && r.status == ReviewStatus::PendingReview
        });
        if pending_exists {
            return Err(StoreError::Duplicate(format!(
                "pending cancellation for session {}",
                request.session_id
            )));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, request_id: Uuid) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(self.cancellations.read().await.get(&request_id).cloned())
    }

    async fn find_pending_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(self
            .cancellations
            .read()
            .await
            .values()
            .find(|r| r.session_id == session_id && r.status == ReviewStatus::PendingReview)
            .cloned())
    }

    async fn list_requests_by_status(
        &self,
        status: ReviewStatus,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        let requests = self.cancellations.read().await;
        let mut matching: Vec<CancellationRequest> =
            requests.values().filter(|r| r.status == status).cloned().collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn transition_request(
        &self,
        updated: &CancellationRequest,
        expected: ReviewStatus,
    ) -> Result<bool, StoreError> {
        let mut requests = self.cancellations.write().await;
        match requests.get_mut(&updated.id) {
            Some(current) if current.status == expected => {
                *current = updated.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("cancellation {}", updated.id))),
        }
    }
}
