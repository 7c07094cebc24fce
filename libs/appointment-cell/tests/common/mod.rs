#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::clock::{Clock, ManualClock};
use appointment_cell::error::StoreError;
use appointment_cell::events::{EventEnvelope, EventPublisher, PublishError};
use appointment_cell::models::{
    CancellationRequest, EntitlementLedger, ParticipantRole, ReviewStatus, Session, Slot,
};
use appointment_cell::store::{
    CancellationStore, InMemoryStore, LedgerStore, SchedulingStores, SessionStore, SlotStore,
};
use appointment_cell::SchedulingEngine;
use shared_config::AppConfig;
use shared_utils::test_utils::TestConfig;

/// Monday 2026-03-02, 00:30 in Sao Paulo.
pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 3, 30, 0).unwrap()
}

pub fn test_config() -> AppConfig {
    TestConfig::default().to_app_config()
}

pub struct Harness {
    pub engine: Arc<SchedulingEngine>,
    pub clock: Arc<ManualClock>,
    pub config: AppConfig,
    pub psychologist_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::build(config, SchedulingStores::in_memory())
    }

    pub fn with_stores(stores: SchedulingStores) -> Self {
        Self::build(test_config(), stores)
    }

    pub fn build(config: AppConfig, stores: SchedulingStores) -> Self {
        let clock = Arc::new(ManualClock::new(start_of_day()));
        let engine = SchedulingEngine::with_stores(&config, stores, clock.clone() as Arc<dyn Clock>);
        Self::assemble(engine, clock, config)
    }

    pub fn with_publisher(config: AppConfig, publisher: Arc<dyn EventPublisher>) -> Self {
        let clock = Arc::new(ManualClock::new(start_of_day()));
        let engine = SchedulingEngine::with_publisher(
            &config,
            SchedulingStores::in_memory(),
            clock.clone() as Arc<dyn Clock>,
            publisher,
        );
        Self::assemble(engine, clock, config)
    }

    fn assemble(engine: SchedulingEngine, clock: Arc<ManualClock>, config: AppConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            clock,
            config,
            psychologist_id: Uuid::new_v4(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.engine.calendar.today()
    }

    /// Declares one open slot `days_ahead` days from today at `hour` local time.
    pub async fn open_slot(&self, days_ahead: i64, hour: u32) -> Slot {
        let date = self.today() + Duration::days(days_ahead);
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap();
        let mut created = self
            .engine
            .slots
            .declare_availability(self.psychologist_id, date, &[time], false)
            .await
            .unwrap();
        created.remove(0)
    }

    pub fn starts_at(&self, slot: &Slot) -> DateTime<Utc> {
        self.engine.calendar.to_utc(slot.date, slot.time).unwrap()
    }

    pub async fn patient_with_cycle(&self, credits: u32) -> Uuid {
        let patient_id = Uuid::new_v4();
        let now = self.clock.now();
        self.engine
            .ledger
            .grant_cycle(patient_id, now - Duration::days(1), now + Duration::days(29), credits)
            .await
            .unwrap();
        patient_id
    }

    pub async fn patient_with_one_off(&self, quantity: u32) -> Uuid {
        let patient_id = Uuid::new_v4();
        let valid_until = self.clock.now() + Duration::days(90);
        self.engine
            .ledger
            .grant_one_off(patient_id, valid_until, quantity)
            .await
            .unwrap();
        patient_id
    }

    pub async fn available_credits(&self, patient_id: Uuid) -> u32 {
        self.engine.ledger.ledger_summary(patient_id).await.unwrap().total_available
    }

    pub async fn slot(&self, slot_id: Uuid) -> Slot {
        self.engine.slots.get_slot(slot_id).await.unwrap()
    }
}

/// In-memory store with switchable faults on individual operations.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_ledger_save: AtomicBool,
    pub fail_session_insert: AtomicBool,
    pub stall_session_insert: AtomicBool,
    pub fail_mark_cancelled: AtomicBool,
    pub fail_slot_release: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stores(self: &Arc<Self>) -> SchedulingStores {
        SchedulingStores::from_shared(self.clone())
    }
}

#[async_trait]
impl SlotStore for FlakyStore {
    async fn insert_slots(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, StoreError> {
        self.inner.insert_slots(slots).await
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        self.inner.get_slot(slot_id).await
    }

    async fn list_slots(
        &self,
        psychologist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        self.inner.list_slots(psychologist_id, from, to).await
    }

    async fn try_hold(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        self.inner.try_hold(slot_id, holder).await
    }

    async fn release(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        if self.fail_slot_release.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("slot write refused".into()));
        }
        self.inner.release(slot_id, holder).await
    }

    async fn set_blocked(&self, slot_id: Uuid, blocked: bool) -> Result<bool, StoreError> {
        self.inner.set_blocked(slot_id, blocked).await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn load_ledger(&self, patient_id: Uuid) -> Result<Option<EntitlementLedger>, StoreError> {
        self.inner.load_ledger(patient_id).await
    }

    async fn save_ledger(
        &self,
        ledger: &EntitlementLedger,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        if self.fail_ledger_save.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("ledger write refused".into()));
        }
        self.inner.save_ledger(ledger, expected_version).await
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        if self.stall_session_insert.load(Ordering::SeqCst) {
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        }
        if self.fail_session_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("session write refused".into()));
        }
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn list_patient_sessions(&self, patient_id: Uuid) -> Result<Vec<Session>, StoreError> {
        self.inner.list_patient_sessions(patient_id).await
    }

    async fn list_psychologist_sessions(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Session>, StoreError> {
        self.inner.list_psychologist_sessions(psychologist_id).await
    }

    async fn mark_cancelled(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.fail_mark_cancelled.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("session write refused".into()));
        }
        self.inner.mark_cancelled(session_id, cancellation_id, at).await
    }

    async fn clear_cancellation(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.inner.clear_cancellation(session_id, cancellation_id).await
    }

    async fn record_join(
        &self,
        session_id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.record_join(session_id, role, at).await
    }

    async fn discard_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.inner.discard_session(session_id).await
    }
}

#[async_trait]
impl CancellationStore for FlakyStore {
    async fn insert_request(&self, request: &CancellationRequest) -> Result<(), StoreError> {
        self.inner.insert_request(request).await
    }

    async fn get_request(&self, request_id: Uuid) -> Result<Option<CancellationRequest>, StoreError> {
        self.inner.get_request(request_id).await
    }

    async fn find_pending_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        self.inner.find_pending_for_session(session_id).await
    }

    async fn list_requests_by_status(
        &self,
        status: ReviewStatus,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        self.inner.list_requests_by_status(status).await
    }

    async fn transition_request(
        &self,
        updated: &CancellationRequest,
        expected: ReviewStatus,
    ) -> Result<bool, StoreError> {
        self.inner.transition_request(updated, expected).await
    }
}

/// Publisher that takes `delay` to deliver every event.
pub struct SlowPublisher {
    pub delay: StdDuration,
}

#[async_trait]
impl EventPublisher for SlowPublisher {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn publish(&self, _envelope: &EventEnvelope) -> Result<(), PublishError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
