// libs/scheduling-cell/src/services/calendar.rs
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    ScheduleEventKind, SchedulingError, SlotPeriod, SlotPeriodSetting, WorkingHours,
    WorkingHoursEntry,
};
use crate::services::cache::AvailabilityCache;
use crate::services::clock::Clock;
use crate::services::events::ScheduleEventBroadcaster;
use crate::store::SchedulingStore;

/// Owns each doctor's weekly working hours and slot period.
pub struct CalendarRulesService {
    store: Arc<dyn SchedulingStore>,
    cache: AvailabilityCache,
    events: ScheduleEventBroadcaster,
    clock: Arc<dyn Clock>,
    default_period: SlotPeriod,
}

impl CalendarRulesService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        cache: AvailabilityCache,
        events: ScheduleEventBroadcaster,
        clock: Arc<dyn Clock>,
        default_period: SlotPeriod,
    ) -> Self {
        Self { store, cache, events, clock, default_period }
    }

    async fn require_doctor(&self, doctor_id: Uuid) -> Result<(), SchedulingError> {
        if self.store.doctor_exists(doctor_id).await? {
            Ok(())
        } else {
            Err(SchedulingError::NotFound("Doctor".to_string()))
        }
    }

    pub async fn working_hours(&self, doctor_id: Uuid) -> Result<Vec<WorkingHours>, SchedulingError> {
        self.require_doctor(doctor_id).await?;
        Ok(self.store.list_working_hours(doctor_id).await?)
    }

    /// Upserts the given days. Days not mentioned keep their current hours.
    #[instrument(skip(self, entries), fields(days = entries.len()))]
    pub async fn set_working_hours(
        &self,
        doctor_id: Uuid,
        entries: Vec<WorkingHoursEntry>,
    ) -> Result<Vec<WorkingHours>, SchedulingError> {
        if entries.is_empty() {
            return Err(SchedulingError::InvalidConfiguration(
                "At least one day of working hours is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let now = self.clock.now();
        let mut hours = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.day_of_week) {
                return Err(SchedulingError::InvalidConfiguration(format!(
                    "Day {} is listed more than once",
                    entry.day_of_week
                )));
            }
            let row = WorkingHours {
                doctor_id,
                day_of_week: entry.day_of_week,
                start_time: entry.start_time,
                end_time: entry.end_time,
                updated_at: now,
            };
            row.validate()?;
            hours.push(row);
        }

        self.require_doctor(doctor_id).await?;
        let saved = self.store.upsert_working_hours(hours).await?;

        self.cache.invalidate_doctor(doctor_id).await;
        self.events.publish(doctor_id, ScheduleEventKind::WorkingHoursChanged, None);
        info!("Working hours updated for doctor {} ({} days)", doctor_id, saved.len());

        Ok(saved)
    }

    /// Stored period, or the configured default when the doctor never set one.
    pub async fn slot_period(&self, doctor_id: Uuid) -> Result<SlotPeriod, SchedulingError> {
        self.require_doctor(doctor_id).await?;
        Ok(self
            .store
            .slot_period(doctor_id)
            .await?
            .map(|setting| setting.period_minutes)
            .unwrap_or(self.default_period))
    }

    #[instrument(skip(self))]
    pub async fn set_slot_period(
        &self,
        doctor_id: Uuid,
        minutes: u32,
    ) -> Result<SlotPeriodSetting, SchedulingError> {
        let period = SlotPeriod::new(minutes)?;
        self.require_doctor(doctor_id).await?;

        let saved = self
            .store
            .set_slot_period(SlotPeriodSetting {
                doctor_id,
                period_minutes: period,
                updated_at: self.clock.now(),
            })
            .await?;

        self.cache.invalidate_doctor(doctor_id).await;
        self.events.publish(doctor_id, ScheduleEventKind::SlotPeriodChanged, None);
        info!("Slot period for doctor {} set to {} minutes", doctor_id, period.minutes());

        Ok(saved)
    }

    pub fn default_period(&self) -> SlotPeriod {
        self.default_period
    }
}
