// libs/appointment-cell/src/engine.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::clock::{BusinessCalendar, Clock, SystemClock};
use crate::events::{
    BroadcastEventPublisher, EventBus, EventPublisher, RedisEventPublisher, DEFAULT_EVENT_CHANNEL,
};
use crate::services::availability::{AvailabilityRules, SlotRegistry};
use crate::services::booking::BookingService;
use crate::services::cancellation::{CancellationPolicy, CancellationService};
use crate::services::ledger::EntitlementLedgerService;
use crate::services::lifecycle::SessionLifecycleService;
use crate::store::SchedulingStores;

/// All scheduling services wired onto one set of stores, one clock and one
/// event bus.
pub struct SchedulingEngine {
    pub calendar: BusinessCalendar,
    pub events: Arc<EventBus>,
    pub broadcast: Arc<BroadcastEventPublisher>,
    pub slots: Arc<SlotRegistry>,
    pub ledger: Arc<EntitlementLedgerService>,
    pub booking: BookingService,
    pub lifecycle: Arc<SessionLifecycleService>,
    pub cancellations: CancellationService,
}

impl SchedulingEngine {
    /// Production wiring: system clock, backend chosen by configuration and
    /// Redis publishing when a URL is configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let broadcast = Arc::new(BroadcastEventPublisher::default());
        let mut bus = EventBus::new(clock.clone()).with_publisher(broadcast.clone());

        if let Some(url) = config.redis_url.as_deref() {
            match RedisEventPublisher::new(url, DEFAULT_EVENT_CHANNEL) {
                Ok(publisher) => bus = bus.with_publisher(Arc::new(publisher)),
                Err(e) => warn!("Redis event publishing disabled: {}", e),
            }
        }

        info!(
            "Scheduling engine using {} storage in {}",
            config.storage_backend, config.business_timezone
        );
        Self::new(config, SchedulingStores::from_config(config), clock, bus, broadcast)
    }

    /// In-memory wiring around a caller-supplied clock.
    pub fn in_memory(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_stores(config, SchedulingStores::in_memory(), clock)
    }

    pub fn with_stores(config: &AppConfig, stores: SchedulingStores, clock: Arc<dyn Clock>) -> Self {
        let broadcast = Arc::new(BroadcastEventPublisher::default());
        let bus = EventBus::new(clock.clone()).with_publisher(broadcast.clone());
        Self::new(config, stores, clock, bus, broadcast)
    }

    /// Like `with_stores`, with one more publisher after the in-process one.
    pub fn with_publisher(
        config: &AppConfig,
        stores: SchedulingStores,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let broadcast = Arc::new(BroadcastEventPublisher::default());
        let bus = EventBus::new(clock.clone())
            .with_publisher(broadcast.clone())
            .with_publisher(publisher);
        Self::new(config, stores, clock, bus, broadcast)
    }

    fn new(
        config: &AppConfig,
        stores: SchedulingStores,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        broadcast: Arc<BroadcastEventPublisher>,
    ) -> Self {
        let calendar = BusinessCalendar::new(config.business_tz(), clock.clone());
        let events = Arc::new(bus);

        let slots = Arc::new(SlotRegistry::new(
            stores.slots.clone(),
            calendar.clone(),
            events.clone(),
            AvailabilityRules {
                horizon_days: config.availability_horizon_days,
                first_hour: config.availability_first_hour,
                last_hour: config.availability_last_hour,
            },
        ));
        let ledger = Arc::new(EntitlementLedgerService::new(
            stores.ledgers.clone(),
            clock.clone(),
            Duration::days(config.credit_back_validity_days),
        ));
        let booking = BookingService::new(
            slots.clone(),
            ledger.clone(),
            stores.sessions.clone(),
            calendar.clone(),
            events.clone(),
            config.session_duration_minutes,
            StdDuration::from_millis(config.booking_step_timeout_ms),
        );
        let lifecycle = Arc::new(SessionLifecycleService::new(stores.sessions.clone(), clock));
        let cancellations = CancellationService::new(
            stores.cancellations.clone(),
            stores.sessions.clone(),
            slots.clone(),
            ledger.clone(),
            calendar.clone(),
            events.clone(),
            CancellationPolicy {
                notice: Duration::hours(config.cancellation_notice_hours),
                require_documents_when_late: config.require_documents_when_late,
            },
        );

        Self {
            calendar,
            events,
            broadcast,
            slots,
            ledger,
            booking,
            lifecycle,
            cancellations,
        }
    }
}
