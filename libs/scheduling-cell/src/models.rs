// libs/scheduling-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// CALENDAR RULES
// ==============================================================================

/// Slot granularities a doctor may configure.
pub const ALLOWED_SLOT_PERIODS: [u32; 5] = [10, 15, 20, 30, 60];

/// Day index used throughout the schedule: 0 = Sunday, 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// Interprets a time-of-day on a calendar date as a UTC instant.
pub fn at_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SlotPeriod(u32);

impl SlotPeriod {
    pub const DEFAULT: SlotPeriod = SlotPeriod(15);

    pub fn new(minutes: u32) -> Result<Self, SchedulingError> {
        if ALLOWED_SLOT_PERIODS.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(SchedulingError::InvalidConfiguration(format!(
                "Slot period must be one of {:?} minutes, got {}",
                ALLOWED_SLOT_PERIODS, minutes
            )))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.0 as i64)
    }

    pub fn capacity_per_hour(&self) -> u32 {
        60 / self.0
    }
}

impl Default for SlotPeriod {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for SlotPeriod {
    type Error = SchedulingError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<SlotPeriod> for u32 {
    fn from(period: SlotPeriod) -> u32 {
        period.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotPeriodSetting {
    pub doctor_id: Uuid,
    pub period_minutes: SlotPeriod,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub doctor_id: Uuid,
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub updated_at: DateTime<Utc>,
}

impl WorkingHours {
    /// Open window for the day, or `None` when the day is closed.
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => Some((start, end)),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.window().is_none()
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if !(0..=6).contains(&self.day_of_week) {
            return Err(SchedulingError::InvalidConfiguration(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        match (self.start_time, self.end_time) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) => {
                if start.second() != 0 || end.second() != 0 || start.nanosecond() != 0 || end.nanosecond() != 0 {
                    return Err(SchedulingError::InvalidConfiguration(
                        "Working hours must be given at minute precision".to_string(),
                    ));
                }
                if start >= end {
                    return Err(SchedulingError::InvalidConfiguration(format!(
                        "Start time {} must be before end time {} on day {}",
                        start, end, self.day_of_week
                    )));
                }
                Ok(())
            }
            _ => Err(SchedulingError::InvalidConfiguration(format!(
                "Day {} must set both start and end time, or neither to close it",
                self.day_of_week
            ))),
        }
    }
}

// ==============================================================================
// TIME OFF
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOff {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeOff {
    /// Whether `[start, end)` intersects this window's `[starts_at, ends_at)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.starts_at, self.ends_at, start, end)
    }
}

pub fn validate_time_off_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    if starts_at >= ends_at {
        return Err(SchedulingError::InvalidConfiguration(
            "Time off must start before it ends".to_string(),
        ));
    }
    Ok(())
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Emergency,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Every status except cancelled holds on to its slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Emergency => write!(f, "emergency"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The interval this appointment blocks under the doctor's current slot period.
    pub fn occupied_interval(&self, period: SlotPeriod) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.scheduled_at, self.scheduled_at + period.duration())
    }

    pub fn occupies(&self, period: SlotPeriod, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if !self.status.occupies_slot() {
            return false;
        }
        let (occupied_start, occupied_end) = self.occupied_interval(period);
        intervals_overlap(occupied_start, occupied_end, start, end)
    }

    /// Pending appointments whose slot time has passed without confirmation.
    pub fn is_expired_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == AppointmentStatus::Pending && self.scheduled_at < now
    }
}

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)` share time.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnavailableReason {
    Booked,
    Blackout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

/// Full slot partition of one doctor's day; this is what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slot_period_minutes: u32,
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn available_slots(&self) -> Vec<Slot> {
        self.slots.iter().filter(|slot| slot.available).cloned().collect()
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAppointment {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: Option<String>,
    #[serde(default)]
    pub emergency: bool,
    pub idempotency_key: Option<String>,
}

impl RequestAppointment {
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        at_utc(self.date, self.time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReallocateRequest {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeOffRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTimeOffRequest {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursEntry {
    pub day_of_week: i32,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetWorkingHoursRequest {
    pub hours: Vec<WorkingHoursEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSlotPeriodRequest {
    pub period_minutes: u32,
}

// ==============================================================================
// EVENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEventKind {
    AppointmentBooked,
    AppointmentStatusChanged,
    AppointmentReallocated,
    AppointmentCancelled,
    TimeOffCreated,
    TimeOffUpdated,
    TimeOffDeleted,
    WorkingHoursChanged,
    SlotPeriodChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub doctor_id: Uuid,
    pub kind: ScheduleEventKind,
    pub subject_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    SlotTaken,
    BlackedOut,
    OutsideWorkingHours,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::SlotTaken => "SLOT_TAKEN",
            ConflictKind::BlackedOut => "BLACKED_OUT",
            ConflictKind::OutsideWorkingHours => "OUTSIDE_WORKING_HOURS",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConflictKind::SlotTaken => "Requested slot is already booked",
            ConflictKind::BlackedOut => "Requested slot falls inside the doctor's time off",
            ConflictKind::OutsideWorkingHours => "Requested time is outside the doctor's working hours",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("{}", .0.message())]
    Conflict(ConflictKind),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl SchedulingError {
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            SchedulingError::Conflict(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Conflict(kind) => AppError::Conflict {
                kind: kind.as_str().to_string(),
                message: kind.message().to_string(),
            },
            SchedulingError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            SchedulingError::InvalidConfiguration(msg) => AppError::ValidationError(msg),
            SchedulingError::InvalidRequest(msg) => AppError::BadRequest(msg),
            SchedulingError::Storage(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment(status: AppointmentStatus, scheduled_at: DateTime<Utc>) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            scheduled_at,
            status,
            reason: None,
            cancellation_reason: None,
            idempotency_key: None,
            created_at: scheduled_at,
            updated_at: scheduled_at,
        }
    }

    #[test]
    fn slot_period_accepts_only_known_values() {
        assert_eq!(SlotPeriod::new(15).unwrap().capacity_per_hour(), 4);
        assert_eq!(SlotPeriod::new(20).unwrap().capacity_per_hour(), 3);
        assert!(matches!(SlotPeriod::new(0), Err(SchedulingError::InvalidConfiguration(_))));
        assert!(matches!(SlotPeriod::new(45), Err(SchedulingError::InvalidConfiguration(_))));
        assert!(serde_json::from_str::<SlotPeriod>("7").is_err());
    }

    #[test]
    fn working_hours_validation() {
        let mut hours = WorkingHours {
            doctor_id: Uuid::new_v4(),
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(9, 0, 0),
            end_time: NaiveTime::from_hms_opt(17, 0, 0),
            updated_at: Utc::now(),
        };
        assert!(hours.validate().is_ok());

        hours.end_time = NaiveTime::from_hms_opt(9, 0, 0);
        assert!(hours.validate().is_err());

        hours.end_time = None;
        assert!(hours.validate().is_err());

        hours.start_time = None;
        assert!(hours.validate().is_ok());
        assert!(hours.is_closed());

        hours.day_of_week = 7;
        assert!(hours.validate().is_err());
    }

    #[test]
    fn expired_pending_is_derived_from_clock() {
        let slot = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        let before = slot - Duration::minutes(1);
        let after = slot + Duration::minutes(1);

        let pending = appointment(AppointmentStatus::Pending, slot);
        assert!(!pending.is_expired_pending(before));
        assert!(pending.is_expired_pending(after));

        let confirmed = appointment(AppointmentStatus::Confirmed, slot);
        assert!(!confirmed.is_expired_pending(after));
    }

    #[test]
    fn cancelled_appointments_do_not_occupy() {
        let slot = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        let period = SlotPeriod::new(30).unwrap();

        let live = appointment(AppointmentStatus::Completed, slot);
        assert!(live.occupies(period, slot + Duration::minutes(15), slot + Duration::minutes(45)));
        assert!(!live.occupies(period, slot + Duration::minutes(30), slot + Duration::minutes(60)));

        let cancelled = appointment(AppointmentStatus::Cancelled, slot);
        assert!(!cancelled.occupies(period, slot, slot + Duration::minutes(30)));
    }

    #[test]
    fn scheduling_errors_map_to_http_kinds() {
        let err: AppError = SchedulingError::Conflict(ConflictKind::BlackedOut).into();
        assert_eq!(err.kind(), "BLACKED_OUT");
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);

        let err: AppError = SchedulingError::NotFound("Appointment".to_string()).into();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        let err: AppError = SchedulingError::InvalidConfiguration("bad".to_string()).into();
        assert_eq!(err.kind(), "INVALID_CONFIGURATION");
    }
}
