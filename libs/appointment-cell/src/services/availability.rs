// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::BusinessCalendar;
use crate::error::SchedulingError;
use crate::events::{DomainEvent, EventBus};
use crate::models::{AvailabilityEntry, Slot, SlotHold, SlotStatus};
use crate::store::SlotStore;

const MAX_LISTING_DAYS: i64 = 92;

#[derive(Debug, Clone, Copy)]
pub struct AvailabilityRules {
    pub horizon_days: i64,
    pub first_hour: u32,
    pub last_hour: u32,
}

impl Default for AvailabilityRules {
    fn default() -> Self {
        Self {
            horizon_days: 60,
            first_hour: 6,
            last_hour: 23,
        }
    }
}

/// Owns every slot. Holding and releasing are crate-private so that only
/// the booking and cancellation flows can move a slot in or out of Held.
pub struct SlotRegistry {
    store: Arc<dyn SlotStore>,
    calendar: BusinessCalendar,
    events: Arc<EventBus>,
    rules: AvailabilityRules,
}

impl SlotRegistry {
    pub fn new(
        store: Arc<dyn SlotStore>,
        calendar: BusinessCalendar,
        events: Arc<EventBus>,
        rules: AvailabilityRules,
    ) -> Self {
        Self { store, calendar, events, rules }
    }

    /// Open and Held slots of a psychologist between two business-local
    /// dates, inclusive. Blocked slots are not listed.
    #[instrument(skip(self))]
    pub async fn list_availability(
        &self,
        psychologist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityEntry>, SchedulingError> {
        if to < from {
            return Err(SchedulingError::Validation(format!(
                "range end {} is before start {}",
                to, from
            )));
        }
        if (to - from).num_days() > MAX_LISTING_DAYS {
            return Err(SchedulingError::Validation(format!(
                "range may span at most {} days",
                MAX_LISTING_DAYS
            )));
        }

        let now = self.calendar.now();
        let slots = self.store.list_slots(psychologist_id, from, to).await?;
        let mut entries = Vec::with_capacity(slots.len());

        for slot in slots.into_iter().filter(|s| s.status != SlotStatus::Blocked) {
            let starts_at = match self.calendar.to_utc(slot.date, slot.time) {
                Ok(at) => at,
                Err(e) => {
                    warn!("Skipping slot {}: {}", slot.id, e);
                    continue;
                }
            };
            entries.push(AvailabilityEntry {
                slot_id: slot.id,
                psychologist_id: slot.psychologist_id,
                date: slot.date,
                time: slot.time,
                starts_at,
                status: slot.status,
                bookable: slot.status == SlotStatus::Open && starts_at > now,
                recurring: slot.recurring,
            });
        }

        debug!("Listed {} availability entries for {}", entries.len(), psychologist_id);
        Ok(entries)
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or(SchedulingError::SlotNotFound(slot_id))
    }

    /// Creates Open slots for the given business-local times. Times already
    /// declared, already past, or absent from the calendar are skipped.
    #[instrument(skip(self, times))]
    pub async fn declare_availability(
        &self,
        psychologist_id: Uuid,
        date: NaiveDate,
        times: &[NaiveTime],
        recurring: bool,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let candidates = self.future_slots(psychologist_id, date, times, recurring);
        let created = self.store.insert_slots(candidates).await?;
        info!(
            "Declared {} slots for psychologist {} on {}",
            created.len(),
            psychologist_id,
            date
        );
        Ok(created)
    }

    /// Hourly slots from the first to the last business hour for every day
    /// between today and the availability horizon.
    #[instrument(skip(self))]
    pub async fn generate_rolling_availability(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let times: Vec<NaiveTime> = (self.rules.first_hour..=self.rules.last_hour)
            .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
            .collect();
        let today = self.calendar.today();

        let mut candidates = Vec::new();
        for offset in 0..=self.rules.horizon_days {
            let date = today + Duration::days(offset);
            candidates.extend(self.future_slots(psychologist_id, date, &times, false));
        }

        let created = self.store.insert_slots(candidates).await?;
        info!("Generated {} rolling slots for psychologist {}", created.len(), psychologist_id);
        Ok(created)
    }

    /// Copies recurring slots from the past week onto the same weekday and
    /// time in the following weeks, up to the horizon.
    #[instrument(skip(self))]
    pub async fn regenerate_recurring(
        &self,
        psychologist_id: Uuid,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let today = self.calendar.today();
        let horizon = today + Duration::days(self.rules.horizon_days);
        let templates: Vec<Slot> = self
            .store
            .list_slots(psychologist_id, today - Duration::days(7), horizon)
            .await?
            .into_iter()
            .filter(|s| s.recurring)
            .collect();

        let mut candidates = Vec::new();
        for template in &templates {
            let mut date = template.date + Duration::days(7);
            while date <= horizon {
                candidates.extend(self.future_slots(
                    psychologist_id,
                    date,
                    &[template.time],
                    true,
                ));
                date += Duration::days(7);
            }
        }

        let created = self.store.insert_slots(candidates).await?;
        info!(
            "Regenerated {} recurring slots from {} templates for psychologist {}",
            created.len(),
            templates.len(),
            psychologist_id
        );
        Ok(created)
    }

    /// Open -> Blocked. A Held slot belongs to a session and cannot be blocked.
    #[instrument(skip(self))]
    pub async fn block_slot(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        let slot = self.get_slot(slot_id).await?;
        if slot.status == SlotStatus::Blocked {
            return Ok(slot);
        }
        if !self.store.set_blocked(slot_id, true).await? {
            return Err(SchedulingError::SlotUnavailable(slot_id));
        }
        info!("Slot {} blocked", slot_id);
        self.get_slot(slot_id).await
    }

    #[instrument(skip(self))]
    pub async fn unblock_slot(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        let slot = self.get_slot(slot_id).await?;
        if slot.status == SlotStatus::Open {
            return Ok(slot);
        }
        if !self.store.set_blocked(slot_id, false).await? {
            return Err(SchedulingError::SlotUnavailable(slot_id));
        }
        info!("Slot {} unblocked", slot_id);
        self.get_slot(slot_id).await
    }

    /// Open -> Held for `holder`. At most one concurrent caller wins; the
    /// rest see `SlotUnavailable`. The caller publishes `SlotHeld` once the
    /// hold is part of a committed booking.
    pub(crate) async fn hold_slot(
        &self,
        slot_id: Uuid,
        holder: Uuid,
    ) -> Result<SlotHold, SchedulingError> {
        if !self.store.try_hold(slot_id, holder).await? {
            debug!("Hold on slot {} lost by {}", slot_id, holder);
            return Err(SchedulingError::SlotUnavailable(slot_id));
        }

        let slot = self.get_slot(slot_id).await?;
        let starts_at = self.calendar.to_utc(slot.date, slot.time)?;

        Ok(SlotHold { slot, holder, starts_at })
    }

    /// Held -> Open when held by `holder`. Returns false if the slot was not
    /// held by that holder, which makes compensation safe to repeat.
    pub(crate) async fn release_slot(
        &self,
        slot_id: Uuid,
        holder: Uuid,
    ) -> Result<bool, SchedulingError> {
        if !self.store.release(slot_id, holder).await? {
            warn!("Slot {} was not held by {}, nothing to release", slot_id, holder);
            return Ok(false);
        }

        let psychologist_id = self
            .store
            .get_slot(slot_id)
            .await?
            .map(|s| s.psychologist_id)
            .unwrap_or_default();
        self.events
            .emit(DomainEvent::SlotReleased { slot_id, psychologist_id })
            .await;

        info!("Slot {} released by {}", slot_id, holder);
        Ok(true)
    }

    fn future_slots(
        &self,
        psychologist_id: Uuid,
        date: NaiveDate,
        times: &[NaiveTime],
        recurring: bool,
    ) -> Vec<Slot> {
        let now = self.calendar.now();
        times
            .iter()
            .filter(|time| match self.calendar.to_utc(date, **time) {
                Ok(starts_at) => starts_at > now,
                Err(e) => {
                    warn!("Not declaring slot: {}", e);
                    false
                }
            })
            .map(|time| Slot::new(psychologist_id, date, *time, recurring, now))
            .collect()
    }
}
