use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{unique_violation, SupabaseClient};

use crate::error::StoreError;
use crate::models::{
    CancellationRequest, CreditSource, EntitlementLedger, ParticipantRole, ReviewStatus, Session,
    Slot, SlotStatus,
};

use super::{CancellationStore, LedgerStore, SessionStore, SlotStore};

const SLOTS: &str = "/rest/v1/slots";
const LEDGERS: &str = "/rest/v1/entitlement_ledgers";
const SESSIONS: &str = "/rest/v1/sessions";
const CANCELLATIONS: &str = "/rest/v1/cancellation_requests";

/// PostgREST-backed persistence. Conditional updates are PATCH requests
/// whose filter carries the expected state; an empty representation means
/// the guard did not match.
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        let rows: Vec<Value> = self.supabase.select(path).await?;
        rows.into_iter().next().map(decode::<T>).transpose()
    }

    async fn select_many<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<Value> = self.supabase.select(path).await?;
        rows.into_iter().map(decode::<T>).collect()
    }

    async fn patch_matched(&self, path: &str, body: Value) -> Result<bool, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .mutate_returning(Method::PATCH, path, body)
            .await?;
        Ok(!rows.is_empty())
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, StoreError> {
    serde_json::from_value(row).map_err(|e| {
        error!("Undecodable row from Supabase: {}", e);
        StoreError::Corrupt(e.to_string())
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Session row as stored. `scheduled_at` is kept raw so that a malformed
/// value degrades to a missing start time instead of hiding the session.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: Uuid,
    slot_id: Uuid,
    patient_id: Uuid,
    psychologist_id: Uuid,
    scheduled_at: Option<String>,
    duration_minutes: i64,
    credit_source: CreditSource,
    cancellation_id: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    patient_joined_at: Option<DateTime<Utc>>,
    psychologist_joined_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            slot_id: session.slot_id,
            patient_id: session.patient_id,
            psychologist_id: session.psychologist_id,
            scheduled_at: session.scheduled_at.map(|at| at.to_rfc3339()),
            duration_minutes: session.duration_minutes,
            credit_source: session.credit_source,
            cancellation_id: session.cancellation_id,
            cancelled_at: session.cancelled_at,
            patient_joined_at: session.patient_joined_at,
            psychologist_joined_at: session.psychologist_joined_at,
            created_at: session.created_at,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let scheduled_at = row.scheduled_at.as_deref().and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    error!("Session {} has unparseable scheduled_at '{}': {}", row.id, raw, e);
                    None
                }
            }
        });

        Session {
            id: row.id,
            slot_id: row.slot_id,
            patient_id: row.patient_id,
            psychologist_id: row.psychologist_id,
            scheduled_at,
            duration_minutes: row.duration_minutes,
            credit_source: row.credit_source,
            cancellation_id: row.cancellation_id,
            cancelled_at: row.cancelled_at,
            patient_joined_at: row.patient_joined_at,
            psychologist_joined_at: row.psychologist_joined_at,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl SlotStore for SupabaseStore {
    async fn insert_slots(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, StoreError> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Value> = self
            .supabase
            .insert_ignoring_duplicates(SLOTS, encode(&slots)?)
            .await?;
        debug!("Inserted {} of {} slots", rows.len(), slots.len());
        rows.into_iter().map(decode::<Slot>).collect()
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}&limit=1", SLOTS, slot_id)).await
    }

    async fn list_slots(
        &self,
        psychologist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        let path = format!(
            "{}?psychologist_id=eq.{}&date=gte.{}&date=lte.{}&order=date.asc,time.asc",
            SLOTS, psychologist_id, from, to
        );
        self.select_many(&path).await
    }

    async fn try_hold(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}&status=eq.{}", SLOTS, slot_id, SlotStatus::Open);
        self.patch_matched(&path, json!({ "status": SlotStatus::Held, "held_by": holder }))
            .await
    }

    async fn release(&self, slot_id: Uuid, holder: Uuid) -> Result<bool, StoreError> {
        let path = format!(
            "{}?id=eq.{}&status=eq.{}&held_by=eq.{}",
            SLOTS, slot_id, SlotStatus::Held, holder
        );
        self.patch_matched(&path, json!({ "status": SlotStatus::Open, "held_by": null }))
            .await
    }

    async fn set_blocked(&self, slot_id: Uuid, blocked: bool) -> Result<bool, StoreError> {
        let (expected, next) = if blocked {
            (SlotStatus::Open, SlotStatus::Blocked)
        } else {
            (SlotStatus::Blocked, SlotStatus::Open)
        };
        let path = format!("{}?id=eq.{}&status=eq.{}", SLOTS, slot_id, expected);
        self.patch_matched(&path, json!({ "status": next })).await
    }
}

#[async_trait]
impl LedgerStore for SupabaseStore {
    async fn load_ledger(&self, patient_id: Uuid) -> Result<Option<EntitlementLedger>, StoreError> {
        self.select_one(&format!("{}?patient_id=eq.{}&limit=1", LEDGERS, patient_id))
            .await
    }

    async fn save_ledger(
        &self,
        ledger: &EntitlementLedger,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        let body = encode(ledger)?;
        match expected_version {
            None => {
                let result: anyhow::Result<Vec<Value>> = self
                    .supabase
                    .mutate_returning(Method::POST, LEDGERS, body)
                    .await;
                match result {
                    Ok(rows) => Ok(!rows.is_empty()),
                    Err(e) if unique_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Some(version) => {
                let path = format!(
                    "{}?patient_id=eq.{}&version=eq.{}",
                    LEDGERS, ledger.patient_id, version
                );
                self.patch_matched(&path, body).await
            }
        }
    }
}

#[async_trait]
impl SessionStore for SupabaseStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let body = encode(&SessionRow::from(session))?;
        let _: Vec<Value> = self
            .supabase
            .mutate_returning(Method::POST, SESSIONS, body)
            .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = self
            .select_one(&format!("{}?id=eq.{}&limit=1", SESSIONS, session_id))
            .await?;
        Ok(row.map(Session::from))
    }

    async fn list_patient_sessions(&self, patient_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = self
            .select_many(&format!(
                "{}?patient_id=eq.{}&order=scheduled_at.asc",
                SESSIONS, patient_id
            ))
            .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn list_psychologist_sessions(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = self
            .select_many(&format!(
                "{}?psychologist_id=eq.{}&order=scheduled_at.asc",
                SESSIONS, psychologist_id
            ))
            .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn mark_cancelled(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}&cancellation_id=is.null", SESSIONS, session_id);
        self.patch_matched(
            &path,
            json!({ "cancellation_id": cancellation_id, "cancelled_at": at }),
        )
        .await
    }

    async fn clear_cancellation(
        &self,
        session_id: Uuid,
        cancellation_id: Uuid,
    ) -> Result<bool, StoreError> {
        let path = format!(
            "{}?id=eq.{}&cancellation_id=eq.{}",
            SESSIONS, session_id, cancellation_id
        );
        self.patch_matched(&path, json!({ "cancellation_id": null, "cancelled_at": null }))
            .await
    }

    async fn record_join(
        &self,
        session_id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let column = match role {
            ParticipantRole::Patient => "patient_joined_at",
            ParticipantRole::Psychologist => "psychologist_joined_at",
        };
        let path = format!("{}?id=eq.{}&{}=is.null", SESSIONS, session_id, column);
        self.patch_matched(&path, json!({ column: at })).await
    }

    async fn discard_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        let path = format!("{}?id=eq.{}", SESSIONS, session_id);
        let _: Vec<Value> = self
            .supabase
            .mutate_returning(Method::DELETE, &path, json!({}))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CancellationStore for SupabaseStore {
    async fn insert_request(&self, request: &CancellationRequest) -> Result<(), StoreError> {
        let _: Vec<Value> = self
            .supabase
            .mutate_returning(Method::POST, CANCELLATIONS, encode(request)?)
            .await?;
        Ok(())
    }

    async fn get_request(&self, request_id: Uuid) -> Result<Option<CancellationRequest>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}&limit=1", CANCELLATIONS, request_id))
            .await
    }

    async fn find_pending_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        self.select_one(&format!(
            "{}?session_id=eq.{}&status=eq.{}&limit=1",
            CANCELLATIONS,
            session_id,
            ReviewStatus::PendingReview
        ))
        .await
    }

    async fn list_requests_by_status(
        &self,
        status: ReviewStatus,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        self.select_many(&format!(
            "{}?status=eq.{}&order=created_at.asc",
            CANCELLATIONS, status
        ))
        .await
    }

    async fn transition_request(
        &self,
        updated: &CancellationRequest,
        expected: ReviewStatus,
    ) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}&status=eq.{}", CANCELLATIONS, updated.id, expected);
        self.patch_matched(&path, encode(updated)?).await
    }
}
