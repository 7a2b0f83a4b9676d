// libs/scheduling-cell/src/store/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, SlotPeriodSetting, TimeOff, WorkingHours};
use crate::store::{SchedulingStore, StoreError};

#[derive(Default)]
struct Tables {
    doctors: HashSet<Uuid>,
    working_hours: HashMap<(Uuid, i32), WorkingHours>,
    slot_periods: HashMap<Uuid, SlotPeriodSetting>,
    time_off: HashMap<Uuid, TimeOff>,
    appointments: HashMap<Uuid, Appointment>,
}

impl Tables {
    /// Mirrors the partial unique index on `(doctor_id, scheduled_at) where status <> 'cancelled'`.
    fn active_slot_holder(&self, candidate: &Appointment) -> Option<&Appointment> {
        if !candidate.status.occupies_slot() {
            return None;
        }
        self.appointments.values().find(|existing| {
            existing.id != candidate.id
                && existing.doctor_id == candidate.doctor_id
                && existing.scheduled_at == candidate.scheduled_at
                && existing.status.occupies_slot()
        })
    }

    fn idempotency_holder(&self, candidate: &Appointment) -> Option<&Appointment> {
        let key = candidate.idempotency_key.as_deref()?;
        if !candidate.status.occupies_slot() {
            return None;
        }
        self.appointments.values().find(|existing| {
            existing.id != candidate.id
                && existing.doctor_id == candidate.doctor_id
                && existing.status.occupies_slot()
                && existing.idempotency_key.as_deref() == Some(key)
        })
    }

    fn check_unique(&self, candidate: &Appointment) -> Result<(), StoreError> {
        if let Some(holder) = self.active_slot_holder(candidate) {
            return Err(StoreError::UniqueViolation(format!(
                "doctor {} already has appointment {} at {}",
                candidate.doctor_id, holder.id, candidate.scheduled_at
            )));
        }
        if let Some(holder) = self.idempotency_holder(candidate) {
            return Err(StoreError::UniqueViolation(format!(
                "idempotency key already used by appointment {}",
                holder.id
            )));
        }
        Ok(())
    }
}

/// Process-local store. Every write takes the table lock once, so a uniqueness
/// check and the write it guards are a single atomic step.
#[derive(Default)]
pub struct InMemorySchedulingStore {
    tables: RwLock<Tables>,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already knows the given doctors.
    pub fn with_doctors(doctor_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                doctors: doctor_ids.into_iter().collect(),
                ..Tables::default()
            }),
        }
    }

    /// Doctor profiles are owned elsewhere; this registers an id the engine may schedule.
    pub async fn register_doctor(&self, doctor_id: Uuid) {
        self.tables.write().await.doctors.insert(doctor_id);
    }

    pub async fn appointment_count(&self) -> usize {
        self.tables.read().await.appointments.len()
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.doctors.contains(&doctor_id))
    }

    async fn list_working_hours(&self, doctor_id: Uuid) -> Result<Vec<WorkingHours>, StoreError> {
        let tables = self.tables.read().await;
        let mut hours: Vec<WorkingHours> = tables
            .working_hours
            .values()
            .filter(|hours| hours.doctor_id == doctor_id)
            .cloned()
            .collect();
        hours.sort_by_key(|hours| hours.day_of_week);
        Ok(hours)
    }

    async fn working_hours_for_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
    ) -> Result<Option<WorkingHours>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .working_hours
            .get(&(doctor_id, day_of_week))
            .cloned())
    }

    async fn upsert_working_hours(
        &self,
        hours: Vec<WorkingHours>,
    ) -> Result<Vec<WorkingHours>, StoreError> {
        let mut tables = self.tables.write().await;
        for entry in &hours {
            tables
                .working_hours
                .insert((entry.doctor_id, entry.day_of_week), entry.clone());
        }
        Ok(hours)
    }

    async fn slot_period(&self, doctor_id: Uuid) -> Result<Option<SlotPeriodSetting>, StoreError> {
        Ok(self.tables.read().await.slot_periods.get(&doctor_id).cloned())
    }

    async fn set_slot_period(
        &self,
        setting: SlotPeriodSetting,
    ) -> Result<SlotPeriodSetting, StoreError> {
        self.tables
            .write()
            .await
            .slot_periods
            .insert(setting.doctor_id, setting.clone());
        Ok(setting)
    }

    async fn list_time_off(&self, doctor_id: Uuid) -> Result<Vec<TimeOff>, StoreError> {
        let tables = self.tables.read().await;
        let mut windows: Vec<TimeOff> = tables
            .time_off
            .values()
            .filter(|window| window.doctor_id == doctor_id)
            .cloned()
            .collect();
        windows.sort_by_key(|window| window.starts_at);
        Ok(windows)
    }

    async fn time_off_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeOff>, StoreError> {
        let tables = self.tables.read().await;
        let mut windows: Vec<TimeOff> = tables
            .time_off
            .values()
            .filter(|window| window.doctor_id == doctor_id && window.overlaps(from, to))
            .cloned()
            .collect();
        windows.sort_by_key(|window| window.starts_at);
        Ok(windows)
    }

    async fn get_time_off(&self, time_off_id: Uuid) -> Result<Option<TimeOff>, StoreError> {
        Ok(self.tables.read().await.time_off.get(&time_off_id).cloned())
    }

    async fn insert_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError> {
        self.tables
            .write()
            .await
            .time_off
            .insert(time_off.id, time_off.clone());
        Ok(time_off)
    }

    async fn update_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.time_off.get_mut(&time_off.id) {
            Some(existing) => {
                *existing = time_off.clone();
                Ok(time_off)
            }
            None => Err(StoreError::NotFound("Time off".to_string())),
        }
    }

    async fn delete_time_off(&self, time_off_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.time_off.remove(&time_off_id).is_some())
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.tables.read().await.appointments.get(&appointment_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        doctor_id: Uuid,
        key: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .appointments
            .values()
            .find(|apt| {
                apt.doctor_id == doctor_id
                    && apt.status.occupies_slot()
                    && apt.idempotency_key.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn active_appointments_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|apt| {
                apt.doctor_id == doctor_id
                    && apt.status.occupies_slot()
                    && apt.scheduled_at >= from
                    && apt.scheduled_at < to
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.scheduled_at);
        Ok(appointments)
    }

    async fn pending_before(
        &self,
        doctor_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|apt| apt.doctor_id == doctor_id && apt.is_expired_pending(before))
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.scheduled_at);
        Ok(appointments)
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_unique(&appointment)?;
        debug!("Inserting appointment {} at {}", appointment.id, appointment.scheduled_at);
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.appointments.contains_key(&appointment.id) {
            return Err(StoreError::NotFound("Appointment".to_string()));
        }
        tables.check_unique(&appointment)?;
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }
}
