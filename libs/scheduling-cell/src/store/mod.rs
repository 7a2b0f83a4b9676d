// libs/scheduling-cell/src/store/mod.rs
//
// Persistence boundary for the scheduling engine. The ledger invariant lives
// here as well as in the admission path: inserting or moving an appointment
// onto a (doctor, scheduled_at) pair already held by a non-cancelled
// appointment must fail with `StoreError::UniqueViolation`.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{Appointment, SchedulingError, SlotPeriodSetting, TimeOff, WorkingHours};

pub use memory::InMemorySchedulingStore;
pub use supabase::SupabaseSchedulingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => StoreError::UniqueViolation(msg),
            DatabaseError::NotFound(msg) => StoreError::NotFound(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("Failed to decode row: {}", err))
    }
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(_) => {
                SchedulingError::Conflict(crate::models::ConflictKind::SlotTaken)
            }
            StoreError::NotFound(what) => SchedulingError::NotFound(what),
            StoreError::Backend(msg) => SchedulingError::Storage(msg),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError>;

    // Calendar rules
    async fn list_working_hours(&self, doctor_id: Uuid) -> Result<Vec<WorkingHours>, StoreError>;

    async fn working_hours_for_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
    ) -> Result<Option<WorkingHours>, StoreError>;

    /// Replaces the rows for each day present in `hours`; other days are untouched.
    async fn upsert_working_hours(
        &self,
        hours: Vec<WorkingHours>,
    ) -> Result<Vec<WorkingHours>, StoreError>;

    async fn slot_period(&self, doctor_id: Uuid) -> Result<Option<SlotPeriodSetting>, StoreError>;

    async fn set_slot_period(
        &self,
        setting: SlotPeriodSetting,
    ) -> Result<SlotPeriodSetting, StoreError>;

    // Time off
    async fn list_time_off(&self, doctor_id: Uuid) -> Result<Vec<TimeOff>, StoreError>;

    /// Windows intersecting `[from, to)`.
    async fn time_off_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeOff>, StoreError>;

    async fn get_time_off(&self, time_off_id: Uuid) -> Result<Option<TimeOff>, StoreError>;

    async fn insert_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError>;

    async fn update_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError>;

    async fn delete_time_off(&self, time_off_id: Uuid) -> Result<bool, StoreError>;

    // Booking ledger
    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        doctor_id: Uuid,
        key: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Non-cancelled appointments whose start lies in `[from, to)`.
    async fn active_appointments_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Pending appointments scheduled before `before`, oldest first.
    async fn pending_before(
        &self,
        doctor_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn update_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError>;
}
