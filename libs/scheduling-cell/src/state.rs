// libs/scheduling-cell/src/state.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

use crate::models::{SchedulingError, SlotPeriod};
use crate::services::{
    AvailabilityCache, AvailabilityResolver, BookingAdmissionService, BookingLedger,
    CalendarRulesService, Clock, ScheduleEventBroadcaster, SystemClock, TimeOffRegistry,
};
use crate::store::{InMemorySchedulingStore, SchedulingStore, SupabaseSchedulingStore};

/// Long-lived engine state shared by every scheduling route. The cache, lock
/// registry and event channel must outlive individual requests.
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
    pub cache: AvailabilityCache,
    pub events: ScheduleEventBroadcaster,
    pub calendar: CalendarRulesService,
    pub time_off: TimeOffRegistry,
    pub ledger: BookingLedger,
    pub resolver: AvailabilityResolver,
    pub admission: BookingAdmissionService,
}

impl SchedulingState {
    /// Builds the engine on the storage backend selected by `SCHEDULING_STORAGE`.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, SchedulingError> {
        let store: Arc<dyn SchedulingStore> = match config.storage_backend {
            StorageBackend::Supabase => {
                info!("Scheduling storage: Supabase at {}", config.supabase_url);
                Arc::new(SupabaseSchedulingStore::new(Arc::new(SupabaseClient::new(&config))))
            }
            StorageBackend::Memory => {
                let doctor_ids = config
                    .scheduling_doctor_ids
                    .iter()
                    .map(|raw| {
                        Uuid::parse_str(raw).map_err(|_| {
                            SchedulingError::InvalidConfiguration(format!(
                                "SCHEDULING_DOCTOR_IDS entry '{}' is not a UUID",
                                raw
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                info!("Scheduling storage: in-memory with {} doctors", doctor_ids.len());
                Arc::new(InMemorySchedulingStore::with_doctors(doctor_ids))
            }
        };
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    pub fn with_store(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulingError> {
        let default_period = SlotPeriod::new(config.default_slot_period_minutes)?;
        let cache = AvailabilityCache::new(Duration::from_secs(config.availability_cache_ttl_secs));
        let events = ScheduleEventBroadcaster::new();

        Ok(Self {
            calendar: CalendarRulesService::new(
                store.clone(),
                cache.clone(),
                events.clone(),
                clock.clone(),
                default_period,
            ),
            time_off: TimeOffRegistry::new(
                store.clone(),
                cache.clone(),
                events.clone(),
                clock.clone(),
                default_period,
            ),
            ledger: BookingLedger::new(store.clone(), clock.clone()),
            resolver: AvailabilityResolver::new(store.clone(), cache.clone(), default_period),
            admission: BookingAdmissionService::new(
                store.clone(),
                cache.clone(),
                events.clone(),
                clock,
                default_period,
            ),
            config,
            store,
            cache,
            events,
        })
    }
}
