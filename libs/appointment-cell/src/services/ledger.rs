// libs/appointment-cell/src/services/ledger.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SchedulingError;
use crate::models::{
    CreditOrigin, CreditSource, DebitRecord, EntitlementLedger, LedgerSummary, OneOffCredit,
    PlanCycle,
};
use crate::store::LedgerStore;

const MAX_CAS_ATTEMPTS: u32 = 8;
const RECENT_DEBIT_LIMIT: usize = 32;

// ==============================================================================
// PURE LEDGER RULES
// ==============================================================================

impl EntitlementLedger {
    pub fn check_integrity(&self) -> Result<(), SchedulingError> {
        if let Some(cycle) = &self.active_cycle {
            if cycle.consumed_credits > cycle.total_credits {
                return Err(SchedulingError::Integrity(format!(
                    "cycle {} of patient {} consumed {} of {} credits",
                    cycle.id, self.patient_id, cycle.consumed_credits, cycle.total_credits
                )));
            }
        }
        Ok(())
    }

    pub fn cycle_credits_available(&self, now: DateTime<Utc>) -> u32 {
        self.active_cycle
            .as_ref()
            .filter(|c| c.is_open(now))
            .map(PlanCycle::remaining)
            .unwrap_or(0)
    }

    pub fn one_off_credits_available(&self, now: DateTime<Utc>) -> u32 {
        self.one_off_credits.iter().filter(|c| c.is_usable(now)).count() as u32
    }

    pub fn summary(&self, now: DateTime<Utc>) -> LedgerSummary {
        let cycle = self.cycle_credits_available(now);
        let one_off = self.one_off_credits_available(now);
        LedgerSummary {
            patient_id: self.patient_id,
            payment_pending: self.payment_pending,
            cycle_credits_available: cycle,
            one_off_credits_available: one_off,
            total_available: cycle + one_off,
            cycle_ends_at: self.active_cycle.as_ref().map(|c| c.ends_at),
            version: self.version,
        }
    }

    /// Cycle credits first, then the one-off credit that expires soonest.
    pub fn select_source(&self, now: DateTime<Utc>) -> Result<CreditSource, SchedulingError> {
        if self.payment_pending {
            return Err(SchedulingError::EntitlementBlocked);
        }
        self.check_integrity()?;

        if let Some(cycle) = self.active_cycle.as_ref().filter(|c| c.is_open(now)) {
            if cycle.remaining() > 0 {
                return Ok(CreditSource::Cycle { cycle_id: cycle.id });
            }
        }

        self.one_off_credits
            .iter()
            .filter(|c| c.is_usable(now))
            .min_by_key(|c| c.valid_until)
            .map(|c| CreditSource::OneOff { credit_id: c.id })
            .ok_or(SchedulingError::NoCreditAvailable)
    }

    pub fn apply_debit(
        &mut self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CreditSource, SchedulingError> {
        let source = self.select_source(now)?;
        self.consume(source, now)?;
        self.recent_debits.push(DebitRecord { session_id, source, debited_at: now });
        if self.recent_debits.len() > RECENT_DEBIT_LIMIT {
            let excess = self.recent_debits.len() - RECENT_DEBIT_LIMIT;
            self.recent_debits.drain(..excess);
        }
        Ok(source)
    }

    /// Returns one credit for `source`: into the same cycle while it is
    /// still open, onto the same one-off credit while it is still valid,
    /// otherwise as a fresh one-off credit.
    pub fn apply_credit_back(
        &mut self,
        source: CreditSource,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> CreditSource {
        match source {
            CreditSource::Cycle { cycle_id } => {
                if let Some(cycle) = self.active_cycle.as_mut() {
                    if cycle.id == cycle_id && cycle.is_open(now) && cycle.consumed_credits > 0 {
                        cycle.consumed_credits -= 1;
                        return source;
                    }
                }
            }
            CreditSource::OneOff { credit_id } => {
                if let Some(credit) = self
                    .one_off_credits
                    .iter_mut()
                    .find(|c| c.id == credit_id && c.consumed && now < c.valid_until)
                {
                    credit.consumed = false;
                    return source;
                }
            }
        }

        let credit = OneOffCredit {
            id: Uuid::new_v4(),
            valid_until: now + validity,
            consumed: false,
            origin: CreditOrigin::CreditBack,
            created_at: now,
        };
        let restored = CreditSource::OneOff { credit_id: credit.id };
        self.one_off_credits.push(credit);
        restored
    }

    fn consume(&mut self, source: CreditSource, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        match source {
            CreditSource::Cycle { cycle_id } => match self.active_cycle.as_mut() {
                Some(cycle) if cycle.id == cycle_id && cycle.remaining() > 0 => {
                    cycle.consumed_credits += 1;
                    Ok(())
                }
                _ => Err(SchedulingError::NoCreditAvailable),
            },
            CreditSource::OneOff { credit_id } => match self
                .one_off_credits
                .iter_mut()
                .find(|c| c.id == credit_id && c.is_usable(now))
            {
                Some(credit) => {
                    credit.consumed = true;
                    Ok(())
                }
                None => Err(SchedulingError::NoCreditAvailable),
            },
        }
    }

    fn take_debit(&mut self, session_id: Uuid) -> Option<DebitRecord> {
        let index = self.recent_debits.iter().position(|d| d.session_id == session_id)?;
        Some(self.recent_debits.remove(index))
    }
}

// ==============================================================================
// LEDGER SERVICE
// ==============================================================================

/// Serializes all writes to a patient's ledger through version-checked
/// saves. A lost race reloads and reapplies the change.
pub struct EntitlementLedgerService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    credit_back_validity: Duration,
}

impl EntitlementLedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, credit_back_validity: Duration) -> Self {
        Self { store, clock, credit_back_validity }
    }

    /// The patient's ledger, or an empty one if none was ever written.
    pub async fn get_ledger(&self, patient_id: Uuid) -> Result<EntitlementLedger, SchedulingError> {
        Ok(self
            .store
            .load_ledger(patient_id)
            .await?
            .unwrap_or_else(|| EntitlementLedger::empty(patient_id, self.clock.now())))
    }

    pub async fn ledger_summary(&self, patient_id: Uuid) -> Result<LedgerSummary, SchedulingError> {
        let ledger = self.get_ledger(patient_id).await?;
        Ok(ledger.summary(self.clock.now()))
    }

    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, patient_id: Uuid) -> Result<LedgerSummary, SchedulingError> {
        let (ledger, _) = self
            .modify(patient_id, |ledger, _| {
                ledger.payment_pending = false;
                Ok(())
            })
            .await?;
        info!("Payment confirmed for patient {}", patient_id);
        Ok(ledger.summary(self.clock.now()))
    }

    #[instrument(skip(self))]
    pub async fn mark_payment_pending(&self, patient_id: Uuid) -> Result<LedgerSummary, SchedulingError> {
        let (ledger, _) = self
            .modify(patient_id, |ledger, _| {
                ledger.payment_pending = true;
                Ok(())
            })
            .await?;
        info!("Payment pending for patient {}, booking blocked", patient_id);
        Ok(ledger.summary(self.clock.now()))
    }

    /// Replaces the active cycle with a new one. Credits left in an open
    /// cycle are forfeited.
    #[instrument(skip(self))]
    pub async fn grant_cycle(
        &self,
        patient_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        total_credits: u32,
    ) -> Result<LedgerSummary, SchedulingError> {
        if ends_at <= starts_at {
            return Err(SchedulingError::Validation(
                "cycle must end after it starts".to_string(),
            ));
        }
        let (ledger, forfeited) = self
            .modify(patient_id, |ledger, now| {
                let unused = ledger
                    .active_cycle
                    .as_ref()
                    .filter(|cycle| cycle.is_open(now))
                    .map(PlanCycle::remaining)
                    .unwrap_or(0);
                ledger.active_cycle = Some(PlanCycle {
                    id: Uuid::new_v4(),
                    starts_at,
                    ends_at,
                    total_credits,
                    consumed_credits: 0,
                });
                Ok(unused)
            })
            .await?;
        if forfeited > 0 {
            warn!(
                "Open cycle for patient {} replaced with {} unused credits",
                patient_id, forfeited
            );
        }
        info!("Granted cycle of {} credits to patient {}", total_credits, patient_id);
        Ok(ledger.summary(self.clock.now()))
    }

    #[instrument(skip(self))]
    pub async fn grant_one_off(
        &self,
        patient_id: Uuid,
        valid_until: DateTime<Utc>,
        quantity: u32,
    ) -> Result<LedgerSummary, SchedulingError> {
        if quantity == 0 {
            return Err(SchedulingError::Validation("quantity must be positive".to_string()));
        }
        if valid_until <= self.clock.now() {
            return Err(SchedulingError::Validation(
                "credit would already be expired".to_string(),
            ));
        }
        let (ledger, _) = self
            .modify(patient_id, |ledger, now| {
                for _ in 0..quantity {
                    ledger.one_off_credits.push(OneOffCredit {
                        id: Uuid::new_v4(),
                        valid_until,
                        consumed: false,
                        origin: CreditOrigin::Purchase,
                        created_at: now,
                    });
                }
                Ok(())
            })
            .await?;
        info!("Granted {} one-off credits to patient {}", quantity, patient_id);
        Ok(ledger.summary(self.clock.now()))
    }

    /// Read-only check that a debit would currently succeed.
    pub(crate) async fn preview_source(&self, patient_id: Uuid) -> Result<CreditSource, SchedulingError> {
        let ledger = self.get_ledger(patient_id).await?;
        ledger.select_source(self.clock.now()).map_err(log_integrity)
    }

    /// Consumes exactly one credit on behalf of `session_id`.
    pub(crate) async fn debit(
        &self,
        patient_id: Uuid,
        session_id: Uuid,
    ) -> Result<CreditSource, SchedulingError> {
        let (_, source) = self
            .modify(patient_id, |ledger, now| ledger.apply_debit(session_id, now))
            .await
            .map_err(log_integrity)?;
        debug!("Debited {:?} from patient {} for session {}", source, patient_id, session_id);
        Ok(source)
    }

    /// Undoes the debit made for `session_id`, if one is on record. Safe to
    /// call when the debit may or may not have been applied.
    pub(crate) async fn refund_debit(
        &self,
        patient_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<CreditSource>, SchedulingError> {
        let validity = self.credit_back_validity;
        let (_, restored) = self
            .modify(patient_id, |ledger, now| {
                Ok(ledger
                    .take_debit(session_id)
                    .map(|debit| ledger.apply_credit_back(debit.source, now, validity)))
            })
            .await?;
        match restored {
            Some(source) => info!("Refunded {:?} to patient {} for session {}", source, patient_id, session_id),
            None => debug!("No debit on record for session {}", session_id),
        }
        Ok(restored)
    }

    /// Returns the credit a cancelled session consumed.
    pub(crate) async fn credit_back(
        &self,
        patient_id: Uuid,
        source: CreditSource,
    ) -> Result<CreditSource, SchedulingError> {
        let validity = self.credit_back_validity;
        let (_, restored) = self
            .modify(patient_id, |ledger, now| Ok(ledger.apply_credit_back(source, now, validity)))
            .await?;
        info!("Credited back {:?} to patient {}", restored, patient_id);
        Ok(restored)
    }

    /// Consumes the specific credit a previous credit-back restored.
    pub(crate) async fn revoke_credit(
        &self,
        patient_id: Uuid,
        source: CreditSource,
    ) -> Result<(), SchedulingError> {
        self.modify(patient_id, |ledger, now| ledger.consume(source, now))
            .await?;
        warn!("Revoked credit {:?} from patient {}", source, patient_id);
        Ok(())
    }

    async fn modify<T, F>(&self, patient_id: Uuid, mut change: F) -> Result<(EntitlementLedger, T), SchedulingError>
    where
        F: FnMut(&mut EntitlementLedger, DateTime<Utc>) -> Result<T, SchedulingError>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let stored = self.store.load_ledger(patient_id).await?;
            let expected_version = stored.as_ref().map(|l| l.version);
            let mut ledger = stored.unwrap_or_else(|| EntitlementLedger::empty(patient_id, now));

            let outcome = change(&mut ledger, now)?;
            ledger.version = expected_version.map_or(1, |v| v + 1);
            ledger.updated_at = now;

            if self.store.save_ledger(&ledger, expected_version).await? {
                return Ok((ledger, outcome));
            }
            debug!("Ledger of patient {} changed underneath attempt {}", patient_id, attempt);
        }

        Err(SchedulingError::ConcurrentModification(format!(
            "ledger of patient {}",
            patient_id
        )))
    }
}

fn log_integrity(err: SchedulingError) -> SchedulingError {
    if let SchedulingError::Integrity(detail) = &err {
        error!("Refusing debit on inconsistent ledger: {}", detail);
    }
    err
}
