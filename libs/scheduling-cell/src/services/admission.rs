// libs/scheduling-cell/src/services/admission.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    at_utc, Appointment, AppointmentStatus, ConflictKind, ReallocateRequest, RequestAppointment,
    ScheduleEventKind, SchedulingError, SlotPeriod,
};
use crate::services::cache::AvailabilityCache;
use crate::services::clock::Clock;
use crate::services::events::ScheduleEventBroadcaster;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::locks::SlotLockRegistry;
use crate::services::resolver::{evaluate_request, DaySchedule};
use crate::store::{SchedulingStore, StoreError};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub appointment: Appointment,
    /// True when an earlier request with the same idempotency key already booked it.
    pub replayed: bool,
}

/// Write side of the engine. Every booking decision is taken under the
/// per-(doctor, day) lock against a snapshot read inside that lock.
pub struct BookingAdmissionService {
    store: Arc<dyn SchedulingStore>,
    cache: AvailabilityCache,
    events: ScheduleEventBroadcaster,
    locks: SlotLockRegistry,
    clock: Arc<dyn Clock>,
    lifecycle: AppointmentLifecycleService,
    default_period: SlotPeriod,
}

fn validate_idempotency_key(key: &str) -> Result<(), SchedulingError> {
    let well_formed = !key.is_empty()
        && key.len() <= MAX_IDEMPOTENCY_KEY_LEN
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(SchedulingError::InvalidRequest(format!(
            "Idempotency key must be 1-{} characters of [A-Za-z0-9_-]",
            MAX_IDEMPOTENCY_KEY_LEN
        )))
    }
}

impl BookingAdmissionService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        cache: AvailabilityCache,
        events: ScheduleEventBroadcaster,
        clock: Arc<dyn Clock>,
        default_period: SlotPeriod,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            locks: SlotLockRegistry::new(),
            clock,
            lifecycle: AppointmentLifecycleService::new(),
            default_period,
        }
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("Appointment".to_string()))
    }

    /// Returns the booking already made under `key`, or rejects a key reused
    /// for a different patient or slot.
    async fn replay(
        &self,
        request: &RequestAppointment,
        key: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, SchedulingError> {
        match self.store.find_by_idempotency_key(request.doctor_id, key).await? {
            Some(existing)
                if existing.patient_id == request.patient_id && existing.scheduled_at == scheduled_at =>
            {
                Ok(Some(existing))
            }
            Some(existing) => {
                warn!("Idempotency key reused by a different request (appointment {})", existing.id);
                Err(SchedulingError::InvalidRequest(
                    "Idempotency key was already used for a different booking".to_string(),
                ))
            }
            None => Ok(None),
        }
    }

    async fn commit(&self, doctor_id: Uuid, kind: ScheduleEventKind, appointment_id: Uuid) {
        self.cache.invalidate_doctor(doctor_id).await;
        self.events.publish(doctor_id, kind, Some(appointment_id));
    }

    #[instrument(
        skip(self, request),
        fields(doctor_id = %request.doctor_id, patient_id = %request.patient_id, date = %request.date, time = %request.time)
    )]
    pub async fn request_appointment(
        &self,
        request: RequestAppointment,
    ) -> Result<AdmissionOutcome, SchedulingError> {
        if let Some(key) = request.idempotency_key.as_deref() {
            validate_idempotency_key(key)?;
        }

        let scheduled_at = request.scheduled_at();

        if !self.store.doctor_exists(request.doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor".to_string()));
        }

        let _guard = self.locks.acquire(request.doctor_id, request.date).await;

        // A retry of a booking that already went through gets its row back,
        // even once the slot has started.
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.replay(&request, key, scheduled_at).await? {
                info!("Replaying appointment {} for idempotency key", existing.id);
                return Ok(AdmissionOutcome { appointment: existing, replayed: true });
            }
        }

        let now = self.clock.now();
        if !request.emergency && scheduled_at < now {
            return Err(SchedulingError::InvalidRequest(
                "Requested slot has already started".to_string(),
            ));
        }

        let schedule =
            DaySchedule::load(self.store.as_ref(), request.doctor_id, request.date, self.default_period).await?;
        if let Err(e) = evaluate_request(&schedule, scheduled_at, None) {
            warn!("Booking rejected: {}", e);
            return Err(e);
        }

        let status = if request.emergency {
            AppointmentStatus::Emergency
        } else {
            AppointmentStatus::Pending
        };
        let appointment = Appointment {
            id: Uuid::new_v4(),
            doctor_id: request.doctor_id,
            patient_id: request.patient_id,
            scheduled_at,
            status,
            reason: request.reason.clone(),
            cancellation_reason: None,
            idempotency_key: request.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };

        let appointment = match self.store.insert_appointment(appointment).await {
            Ok(saved) => saved,
            Err(StoreError::UniqueViolation(detail)) => {
                // Another process won the race. If it was our own retry, hand back its row.
                if let Some(key) = request.idempotency_key.as_deref() {
                    if let Some(existing) = self.replay(&request, key, scheduled_at).await? {
                        return Ok(AdmissionOutcome { appointment: existing, replayed: true });
                    }
                }
                warn!("Slot taken at storage level: {}", detail);
                return Err(SchedulingError::Conflict(ConflictKind::SlotTaken));
            }
            Err(e) => return Err(e.into()),
        };

        self.commit(appointment.doctor_id, ScheduleEventKind::AppointmentBooked, appointment.id).await;
        info!("Appointment {} booked as {}", appointment.id, appointment.status);

        Ok(AdmissionOutcome { appointment, replayed: false })
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.load_appointment(appointment_id).await?;
        let _guard = self
            .locks
            .acquire(current.doctor_id, current.scheduled_at.date_naive())
            .await;

        // Re-read under the lock; a concurrent move may have changed it.
        let mut appointment = self.load_appointment(appointment_id).await?;
        self.lifecycle.validate_status_transition(appointment.status, new_status)?;
        if appointment.status == new_status {
            return Ok(appointment);
        }

        let previous = appointment.status;
        appointment.status = new_status;
        appointment.updated_at = self.clock.now();
        let appointment = self.store.update_appointment(appointment).await?;

        self.commit(appointment.doctor_id, ScheduleEventKind::AppointmentStatusChanged, appointment.id)
            .await;
        info!("Appointment {} moved from {} to {}", appointment.id, previous, appointment.status);

        Ok(appointment)
    }

    #[instrument(skip(self, request), fields(date = %request.date, time = %request.time))]
    pub async fn reallocate(
        &self,
        appointment_id: Uuid,
        request: ReallocateRequest,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.load_appointment(appointment_id).await?;
        let target_at = at_utc(request.date, request.time);

        let _guards = self
            .locks
            .acquire_pair(current.doctor_id, current.scheduled_at.date_naive(), request.date)
            .await;

        let mut appointment = self.load_appointment(appointment_id).await?;
        self.lifecycle.validate_reallocation(appointment.status)?;

        let target_status = request.status.unwrap_or(appointment.status);
        self.lifecycle.validate_status_transition(appointment.status, target_status)?;
        if target_status.is_terminal() {
            return Err(SchedulingError::InvalidRequest(format!(
                "Reallocation cannot leave the appointment {}",
                target_status
            )));
        }

        let now = self.clock.now();
        if target_at < now && target_status != AppointmentStatus::Emergency {
            return Err(SchedulingError::InvalidRequest(
                "Only emergency appointments can be moved into the past".to_string(),
            ));
        }

        let schedule =
            DaySchedule::load(self.store.as_ref(), appointment.doctor_id, request.date, self.default_period).await?;
        if let Err(e) = evaluate_request(&schedule, target_at, Some(appointment.id)) {
            warn!("Reallocation of {} rejected: {}", appointment.id, e);
            return Err(e);
        }

        let from = appointment.scheduled_at;
        appointment.scheduled_at = target_at;
        appointment.status = target_status;
        appointment.updated_at = now;
        let appointment = self.store.update_appointment(appointment).await?;

        self.commit(appointment.doctor_id, ScheduleEventKind::AppointmentReallocated, appointment.id)
            .await;
        info!("Appointment {} moved from {} to {}", appointment.id, from, appointment.scheduled_at);

        Ok(appointment)
    }

    /// Cancelling twice is a no-op; completed appointments stay completed.
    #[instrument(skip(self, reason))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.load_appointment(appointment_id).await?;
        if current.status == AppointmentStatus::Cancelled {
            return Ok(current);
        }

        let _guard = self
            .locks
            .acquire(current.doctor_id, current.scheduled_at.date_naive())
            .await;

        let mut appointment = self.load_appointment(appointment_id).await?;
        match appointment.status {
            AppointmentStatus::Cancelled => return Ok(appointment),
            AppointmentStatus::Completed => {
                return Err(SchedulingError::InvalidRequest(
                    "Completed appointments cannot be cancelled".to_string(),
                ))
            }
            _ => {}
        }

        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancellation_reason = reason;
        appointment.updated_at = self.clock.now();
        let appointment = self.store.update_appointment(appointment).await?;

        self.commit(appointment.doctor_id, ScheduleEventKind::AppointmentCancelled, appointment.id)
            .await;
        info!("Appointment {} cancelled", appointment.id);

        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use assert_matches::assert_matches;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    use crate::models::{SlotPeriodSetting, WorkingHours};
    use crate::services::clock::ManualClock;
    use crate::store::MockSchedulingStore;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn service(store: MockSchedulingStore, cache: AvailabilityCache) -> BookingAdmissionService {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
        BookingAdmissionService::new(
            Arc::new(store),
            cache,
            ScheduleEventBroadcaster::new(),
            clock,
            SlotPeriod::DEFAULT,
        )
    }

    fn open_day(store: &mut MockSchedulingStore, doctor_id: Uuid) {
        store.expect_doctor_exists().returning(|_| Ok(true));
        store.expect_working_hours_for_day().returning(move |_, day| {
            Ok(Some(WorkingHours {
                doctor_id,
                day_of_week: day,
                start_time: NaiveTime::from_hms_opt(9, 0, 0),
                end_time: NaiveTime::from_hms_opt(17, 0, 0),
                updated_at: Utc::now(),
            }))
        });
        store.expect_slot_period().returning(move |_| {
            Ok(Some(SlotPeriodSetting {
                doctor_id,
                period_minutes: SlotPeriod::DEFAULT,
                updated_at: Utc::now(),
            }))
        });
        store.expect_active_appointments_between().returning(|_, _, _| Ok(vec![]));
        store.expect_time_off_between().returning(|_, _, _| Ok(vec![]));
    }

    fn request(doctor_id: Uuid) -> RequestAppointment {
        RequestAppointment {
            doctor_id,
            patient_id: Uuid::new_v4(),
            date: monday(),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            reason: None,
            emergency: false,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn storage_failure_surfaces_and_leaves_cache_alone() {
        let doctor_id = Uuid::new_v4();
        let mut store = MockSchedulingStore::new();
        open_day(&mut store, doctor_id);
        store
            .expect_insert_appointment()
            .times(1)
            .returning(|_| Err(StoreError::Backend("connection reset".to_string())));

        let cache = AvailabilityCache::new(StdDuration::from_secs(60));
        let generation = cache.generation(doctor_id).await;
        let admission = service(store, cache.clone());

        let err = admission.request_appointment(request(doctor_id)).await.unwrap_err();

        assert_matches!(err, SchedulingError::Storage(_));
        assert_eq!(cache.generation(doctor_id).await, generation);
    }

    #[tokio::test]
    async fn storage_unique_violation_becomes_slot_taken() {
        let doctor_id = Uuid::new_v4();
        let mut store = MockSchedulingStore::new();
        open_day(&mut store, doctor_id);
        store
            .expect_insert_appointment()
            .returning(|_| Err(StoreError::UniqueViolation("appointments_active_slot".to_string())));

        let admission = service(store, AvailabilityCache::new(StdDuration::from_secs(60)));

        let err = admission.request_appointment(request(doctor_id)).await.unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::SlotTaken));
    }

    #[tokio::test]
    async fn unknown_doctor_is_not_found_without_touching_the_ledger() {
        let mut store = MockSchedulingStore::new();
        store.expect_doctor_exists().returning(|_| Ok(false));
        store.expect_insert_appointment().never();

        let admission = service(store, AvailabilityCache::new(StdDuration::from_secs(60)));

        let err = admission.request_appointment(request(Uuid::new_v4())).await.unwrap_err();
        assert_matches!(err, SchedulingError::NotFound(_));
    }

    #[test]
    fn idempotency_keys_must_be_url_safe() {
        assert!(validate_idempotency_key("booking-42_a").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("a&b=c").is_err());
        assert!(validate_idempotency_key(&"k".repeat(129)).is_err());
    }
}
