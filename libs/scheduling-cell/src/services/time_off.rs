// libs/scheduling-cell/src/services/time_off.rs
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    validate_time_off_window, Appointment, CreateTimeOffRequest, ScheduleEventKind,
    SchedulingError, SlotPeriod, TimeOff, UpdateTimeOffRequest, ALLOWED_SLOT_PERIODS,
};
use crate::services::cache::AvailabilityCache;
use crate::services::clock::Clock;
use crate::services::events::ScheduleEventBroadcaster;
use crate::store::SchedulingStore;

/// Blackout windows. Creating or moving one never touches existing bookings;
/// `conflicting_appointments` lets staff see what sits underneath.
pub struct TimeOffRegistry {
    store: Arc<dyn SchedulingStore>,
    cache: AvailabilityCache,
    events: ScheduleEventBroadcaster,
    clock: Arc<dyn Clock>,
    default_period: SlotPeriod,
}

impl TimeOffRegistry {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        cache: AvailabilityCache,
        events: ScheduleEventBroadcaster,
        clock: Arc<dyn Clock>,
        default_period: SlotPeriod,
    ) -> Self {
        Self { store, cache, events, clock, default_period }
    }

    pub async fn list(&self, doctor_id: Uuid) -> Result<Vec<TimeOff>, SchedulingError> {
        Ok(self.store.list_time_off(doctor_id).await?)
    }

    /// Looks up a window and checks it belongs to `doctor_id`.
    pub async fn get(&self, doctor_id: Uuid, time_off_id: Uuid) -> Result<TimeOff, SchedulingError> {
        match self.store.get_time_off(time_off_id).await? {
            Some(window) if window.doctor_id == doctor_id => Ok(window),
            _ => Err(SchedulingError::NotFound("Time off".to_string())),
        }
    }

    #[instrument(skip(self, request))]
    pub async fn create(
        &self,
        doctor_id: Uuid,
        request: CreateTimeOffRequest,
    ) -> Result<TimeOff, SchedulingError> {
        validate_time_off_window(request.starts_at, request.ends_at)?;
        if !self.store.doctor_exists(doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor".to_string()));
        }

        let now = self.clock.now();
        let window = self
            .store
            .insert_time_off(TimeOff {
                id: Uuid::new_v4(),
                doctor_id,
                starts_at: request.starts_at,
                ends_at: request.ends_at,
                reason: request.reason,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.after_change(doctor_id, ScheduleEventKind::TimeOffCreated, window.id).await;
        self.warn_if_conflicting(&window).await;
        Ok(window)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        doctor_id: Uuid,
        time_off_id: Uuid,
        request: UpdateTimeOffRequest,
    ) -> Result<TimeOff, SchedulingError> {
        let mut window = self.get(doctor_id, time_off_id).await?;

        if let Some(starts_at) = request.starts_at {
            window.starts_at = starts_at;
        }
        if let Some(ends_at) = request.ends_at {
            window.ends_at = ends_at;
        }
        if request.reason.is_some() {
            window.reason = request.reason;
        }
        validate_time_off_window(window.starts_at, window.ends_at)?;
        window.updated_at = self.clock.now();

        let window = self.store.update_time_off(window).await?;

        self.after_change(doctor_id, ScheduleEventKind::TimeOffUpdated, window.id).await;
        self.warn_if_conflicting(&window).await;
        Ok(window)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, doctor_id: Uuid, time_off_id: Uuid) -> Result<(), SchedulingError> {
        self.get(doctor_id, time_off_id).await?;
        if !self.store.delete_time_off(time_off_id).await? {
            return Err(SchedulingError::NotFound("Time off".to_string()));
        }

        self.after_change(doctor_id, ScheduleEventKind::TimeOffDeleted, time_off_id).await;
        Ok(())
    }

    /// Live appointments whose occupied interval intersects the window.
    pub async fn conflicting_appointments(
        &self,
        doctor_id: Uuid,
        time_off_id: Uuid,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let window = self.get(doctor_id, time_off_id).await?;
        self.appointments_under(&window).await
    }

    async fn appointments_under(&self, window: &TimeOff) -> Result<Vec<Appointment>, SchedulingError> {
        let period = self
            .store
            .slot_period(window.doctor_id)
            .await?
            .map(|setting| setting.period_minutes)
            .unwrap_or(self.default_period);
        let lookback = Duration::minutes(ALLOWED_SLOT_PERIODS.iter().copied().max().unwrap_or(60) as i64);

        let candidates = self
            .store
            .active_appointments_between(window.doctor_id, window.starts_at - lookback, window.ends_at)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|apt| apt.occupies(period, window.starts_at, window.ends_at))
            .collect())
    }

    async fn after_change(&self, doctor_id: Uuid, kind: ScheduleEventKind, time_off_id: Uuid) {
        self.cache.invalidate_doctor(doctor_id).await;
        self.events.publish(doctor_id, kind, Some(time_off_id));
        info!("Time off {} changed for doctor {}: {:?}", time_off_id, doctor_id, kind);
    }

    async fn warn_if_conflicting(&self, window: &TimeOff) {
        match self.appointments_under(window).await {
            Ok(conflicts) if !conflicts.is_empty() => warn!(
                "Time off {} overlaps {} existing appointment(s) for doctor {}",
                window.id,
                conflicts.len(),
                window.doctor_id
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not check bookings under time off {}: {}", window.id, e),
        }
    }
}
