// libs/appointment-cell/src/clock.rs
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::SchedulingError;

/// Source of "now" for every time-dependent decision in the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests to walk a session
/// through its lifecycle.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Converts between business-local civil time and UTC instants. All slot
/// dates and times are interpreted in this zone, never the host's.
#[derive(Clone)]
pub struct BusinessCalendar {
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl BusinessCalendar {
    pub fn new(tz: Tz, clock: Arc<dyn Clock>) -> Self {
        Self { tz, clock }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.tz).date_naive()
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    /// Ambiguous local times resolve to the earlier instant. Local times
    /// skipped by a DST jump do not exist and are rejected.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, SchedulingError> {
        match self.tz.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(SchedulingError::Integrity(format!(
                "{} {} does not exist in {}",
                date, time, self.tz
            ))),
        }
    }
}

impl std::fmt::Debug for BusinessCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessCalendar").field("tz", &self.tz).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar_at(tz: Tz, at: DateTime<Utc>) -> BusinessCalendar {
        BusinessCalendar::new(tz, Arc::new(ManualClock::new(at)))
    }

    #[test]
    fn converts_business_local_time_to_utc() {
        let calendar = calendar_at(chrono_tz::America::Sao_Paulo, Utc::now());
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();

        let utc = calendar.to_utc(date, time).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 3, 10, 17, 0, 0).unwrap());
    }

    #[test]
    fn today_follows_business_zone_not_utc() {
        // 01:30 UTC is still the previous evening in Sao Paulo.
        let at = Utc.with_ymd_and_hms(2026, 3, 11, 1, 30, 0).unwrap();
        let calendar = calendar_at(chrono_tz::America::Sao_Paulo, at);
        assert_eq!(calendar.today(), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn ambiguous_time_takes_earliest_instant() {
        let calendar = calendar_at(chrono_tz::America::New_York, Utc::now());
        let date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let time = NaiveTime::from_hms_opt(1, 30, 0).unwrap();

        let utc = calendar.to_utc(date, time).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }

    #[test]
    fn skipped_time_is_rejected() {
        let calendar = calendar_at(chrono_tz::America::New_York, Utc::now());
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();

        assert!(matches!(calendar.to_utc(date, time), Err(SchedulingError::Integrity(_))));
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(61));
        assert_eq!(clock.now(), start + Duration::minutes(61));
    }
}
