// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// SLOT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Open,
    Held,
    Blocked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Open => "open",
            SlotStatus::Held => "held",
            SlotStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable unit of a psychologist's time, expressed in business-local
/// civil date and time. `held_by` names the session holding the slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: SlotStatus,
    #[serde(default)]
    pub held_by: Option<Uuid>,
    #[serde(default)]
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(
        psychologist_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        recurring: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            psychologist_id,
            date,
            time,
            status: SlotStatus::Open,
            held_by: None,
            recurring,
            created_at: now,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            psychologist_id: self.psychologist_id,
            date: self.date,
            time: self.time,
        }
    }
}

/// Natural key of a slot; at most one slot exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub psychologist_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityEntry {
    pub slot_id: Uuid,
    pub psychologist_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub bookable: bool,
    pub recurring: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotHold {
    pub slot: Slot,
    pub holder: Uuid,
    pub starts_at: DateTime<Utc>,
}

// ==============================================================================
// ENTITLEMENT LEDGER MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanCycle {
    pub id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_credits: u32,
    pub consumed_credits: u32,
}

impl PlanCycle {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    pub fn remaining(&self) -> u32 {
        self.total_credits.saturating_sub(self.consumed_credits)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreditOrigin {
    Purchase,
    CreditBack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneOffCredit {
    pub id: Uuid,
    pub valid_until: DateTime<Utc>,
    pub consumed: bool,
    pub origin: CreditOrigin,
    pub created_at: DateTime<Utc>,
}

impl OneOffCredit {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && now < self.valid_until
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditSource {
    Cycle { cycle_id: Uuid },
    OneOff { credit_id: Uuid },
}

/// A debit that can still be traced back to the session it paid for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebitRecord {
    pub session_id: Uuid,
    pub source: CreditSource,
    pub debited_at: DateTime<Utc>,
}

/// Per-patient entitlement state. Every write bumps `version`; writers
/// compare-and-set against the version they read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitlementLedger {
    pub patient_id: Uuid,
    pub version: u64,
    #[serde(default)]
    pub payment_pending: bool,
    #[serde(default)]
    pub active_cycle: Option<PlanCycle>,
    #[serde(default)]
    pub one_off_credits: Vec<OneOffCredit>,
    #[serde(default)]
    pub recent_debits: Vec<DebitRecord>,
    pub updated_at: DateTime<Utc>,
}

impl EntitlementLedger {
    pub fn empty(patient_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            patient_id,
            version: 0,
            payment_pending: false,
            active_cycle: None,
            one_off_credits: Vec::new(),
            recent_debits: Vec::new(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSummary {
    pub patient_id: Uuid,
    pub payment_pending: bool,
    pub cycle_credits_available: u32,
    pub one_off_credits_available: u32,
    pub total_available: u32,
    pub cycle_ends_at: Option<DateTime<Utc>>,
    pub version: u64,
}

// ==============================================================================
// SESSION MODELS
// ==============================================================================

/// A booked appointment. Lifecycle status is never stored; it is derived
/// from `scheduled_at`, `duration_minutes`, the clock and the approved
/// cancellation marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub psychologist_id: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub credit_source: CreditSource,
    pub cancellation_id: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub patient_joined_at: Option<DateTime<Utc>>,
    pub psychologist_joined_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn participant_role(&self, user_id: Uuid) -> Option<ParticipantRole> {
        if self.patient_id == user_id {
            Some(ParticipantRole::Patient)
        } else if self.psychologist_id == user_id {
            Some(ParticipantRole::Psychologist)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Attendance {
    Attended,
    PatientNoShow,
    PsychologistNoShow,
    Unrecorded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Reserved,
    InProgress,
    Completed { attendance: Attendance },
    Cancelled,
}

impl SessionStatus {
    pub fn is_cancellable(&self) -> bool {
        matches!(self, SessionStatus::Reserved | SessionStatus::InProgress)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Reserved => write!(f, "reserved"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed { .. } => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub status: SessionStatus,
    pub access_window: Option<AccessWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Patient,
    Psychologist,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Patient => "patient",
            ParticipantRole::Psychologist => "psychologist",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// CANCELLATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequesterRole {
    Patient,
    Psychologist,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub role: RequesterRole,
}

impl Requester {
    pub fn new(user_id: Uuid, role: RequesterRole) -> Self {
        Self { user_id, role }
    }

    pub fn system() -> Self {
        Self { user_id: Uuid::nil(), role: RequesterRole::System }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, RequesterRole::Admin | RequesterRole::System)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineClass {
    OnTime,
    Late,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForceMajeureCause {
    PlatformOutage,
    ConferencingFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub protocol: String,
    pub session_id: Uuid,
    pub requested_by: Requester,
    pub reason: String,
    #[serde(default)]
    pub documents: Vec<String>,
    pub deadline: DeadlineClass,
    pub force_majeure: Option<ForceMajeureCause>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCancellation {
    pub session_id: Uuid,
    pub requested_by: Requester,
    pub reason: String,
    pub documents: Vec<String>,
    pub force_majeure: Option<ForceMajeureCause>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub request: CancellationRequest,
    pub session_status: SessionStatus,
    pub credited: Option<CreditSource>,
    pub slot_released: bool,
}

// ==============================================================================
// REQUEST/RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DeclareAvailabilityRequest {
    pub psychologist_id: Uuid,
    pub date: NaiveDate,
    pub times: Vec<NaiveTime>,
    #[serde(default)]
    pub recurring: bool,
}

#[derive(Debug, Deserialize)]
pub struct BookSessionRequest {
    pub patient_id: Uuid,
    pub slot_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateCancellationRequest {
    pub reason: String,
    #[serde(default)]
    pub documents: Vec<String>,
    pub force_majeure: Option<ForceMajeureCause>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewCancellationRequest {
    pub decision: ReviewDecision,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantCycleRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_credits: u32,
}

#[derive(Debug, Deserialize)]
pub struct GrantOneOffRequest {
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}
