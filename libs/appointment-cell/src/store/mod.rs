// libs/appointment-cell/src/store/mod.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};

use crate::error::StoreError;
use crate::models::{
    CancellationRequest, EntitlementLedger, ParticipantRole, ReviewStatus, Session, Slot,
};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;

/// Slot persistence. Status changes are conditional so that concurrent
/// holders are totally ordered by the backend.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Inserts slots whose (psychologist, date, time) key is unused and
    /// returns the ones actually written.
    async fn insert_slots(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, StoreError>;

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError>;

    /// Slots of one psychologist with `from <= date <= to`, ordered by date and time.
    async fn list_slots(
        &self,
        psychologist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError>;

    /// Open -> Held, recording the holder. Returns false if the slot was not Open.
    async fn try_hold(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError>;

    /// Held -> Open, only when held by `holder`.
    async fn release(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError>;

    /// Open -> Blocked when `blocked`, Blocked -> Open otherwise.
    async fn set_blocked(&self, slot_id: Uuid, blocked: bool) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_ledger(&self, patient_id: Uuid) -> Result<Option<EntitlementLedger>, StoreError>;

    /// Writes `ledger` if the stored version equals `expected_version`
    /// (`None` meaning no ledger exists yet). Returns false on a lost race.
    async fn save_ledger(
        &self,
        ledger: &EntitlementLedger,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn list_patient_sessions(&self, patient_id: Uuid) -> Result<Vec<Session>, StoreError>;

    async fn list_psychologist_sessions(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Session>, StoreError>;

    /// Sets the cancellation marker unless one is already present.
    async fn mark_cancelled(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clears the marker written by `mark_cancelled` for the same request.
    async fn clear_cancellation(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// Records the first join of a participant; later joins are ignored.
    async fn record_join(
        &self,
        session_id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Removes a session that was never acknowledged to a caller.
    async fn discard_session(&self, session_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CancellationStore: Send + Sync {
    /// Fails with `StoreError::Duplicate` if the session already has a
    /// request pending review.
    async fn insert_request(&self, request: &CancellationRequest) -> Result<(), StoreError>;

    async fn get_request(&self, request_id: Uuid) -> Result<Option<CancellationRequest>, StoreError>;

    async fn find_pending_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    async fn list_requests_by_status(
        &self,
        status: ReviewStatus,
    ) -> Result<Vec<CancellationRequest>, StoreError>;

    /// Replaces the stored request with `updated` if its status is still `expected`.
    async fn transition_request(
        &self,
        updated: &CancellationRequest,
        expected: ReviewStatus,
    ) -> Result<bool, StoreError>;
}

/// The four stores the engine runs on, behind trait objects so tests can
/// wrap them with failure injection.
#[derive(Clone)]
pub struct SchedulingStores {
    pub slots: Arc<dyn SlotStore>,
    pub ledgers: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub cancellations: Arc<dyn CancellationStore>,
}

impl SchedulingStores {
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(InMemoryStore::new()))
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.storage_backend {
            StorageBackend::Memory => Self::in_memory(),
            StorageBackend::Supabase => Self::from_shared(Arc::new(SupabaseStore::new(config))),
        }
    }

    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: SlotStore + LedgerStore + SessionStore + CancellationStore + 'static,
    {
        Self {
            slots: store.clone(),
            ledgers: store.clone(),
            sessions: store.clone(),
            cancellations: store,
        }
    }
}
