// libs/scheduling-cell/src/services/resolver.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{
    at_utc, day_of_week, Appointment, ConflictKind, DayAvailability, SchedulingError, Slot,
    SlotPeriod, TimeOff, UnavailableReason, ALLOWED_SLOT_PERIODS,
};
use crate::services::cache::AvailabilityCache;
use crate::store::SchedulingStore;

/// Everything the resolver needs to know about one doctor's day, read once.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub period: SlotPeriod,
    pub window: Option<(NaiveTime, NaiveTime)>,
    pub appointments: Vec<Appointment>,
    pub time_off: Vec<TimeOff>,
}

impl DaySchedule {
    pub async fn load(
        store: &dyn SchedulingStore,
        doctor_id: Uuid,
        date: NaiveDate,
        default_period: SlotPeriod,
    ) -> Result<Self, SchedulingError> {
        let window = store
            .working_hours_for_day(doctor_id, day_of_week(date))
            .await?
            .and_then(|hours| hours.window());

        let period = store
            .slot_period(doctor_id)
            .await?
            .map(|setting| setting.period_minutes)
            .unwrap_or(default_period);

        let day_start = at_utc(date, NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);

        // An appointment that started late the previous day can still reach
        // into this one, up to the longest allowed period.
        let lookback = Duration::minutes(ALLOWED_SLOT_PERIODS.iter().copied().max().unwrap_or(60) as i64);
        let appointments = store
            .active_appointments_between(doctor_id, day_start - lookback, day_end)
            .await?;
        let time_off = store.time_off_between(doctor_id, day_start, day_end).await?;

        Ok(Self { doctor_id, date, period, window, appointments, time_off })
    }

    /// A closed or unconfigured day.
    pub fn closed(doctor_id: Uuid, date: NaiveDate, period: SlotPeriod) -> Self {
        Self {
            doctor_id,
            date,
            period,
            window: None,
            appointments: Vec::new(),
            time_off: Vec::new(),
        }
    }

    fn is_blacked_out(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.time_off.iter().any(|window| window.overlaps(start, end))
    }

    fn is_booked(&self, start: DateTime<Utc>, end: DateTime<Utc>, exclude: Option<Uuid>) -> bool {
        self.appointments
            .iter()
            .filter(|apt| Some(apt.id) != exclude)
            .any(|apt| apt.occupies(self.period, start, end))
    }
}

/// Splits the open window into consecutive full periods; a trailing remainder
/// shorter than one period is dropped.
pub fn partition_day(
    date: NaiveDate,
    window: Option<(NaiveTime, NaiveTime)>,
    period: SlotPeriod,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let Some((open, close)) = window else {
        return Vec::new();
    };

    let close_at = at_utc(date, close);
    let step = period.duration();
    let mut slots = Vec::new();
    let mut start = at_utc(date, open);

    while start + step <= close_at {
        slots.push((start, start + step));
        start += step;
    }

    slots
}

pub fn resolve_day(schedule: &DaySchedule) -> DayAvailability {
    let slots = partition_day(schedule.date, schedule.window, schedule.period)
        .into_iter()
        .map(|(starts_at, ends_at)| {
            let reason = if schedule.is_blacked_out(starts_at, ends_at) {
                Some(UnavailableReason::Blackout)
            } else if schedule.is_booked(starts_at, ends_at, None) {
                Some(UnavailableReason::Booked)
            } else {
                None
            };

            Slot {
                date: schedule.date,
                time: starts_at.time(),
                starts_at,
                ends_at,
                duration_minutes: schedule.period.minutes(),
                available: reason.is_none(),
                reason,
            }
        })
        .collect();

    DayAvailability {
        doctor_id: schedule.doctor_id,
        date: schedule.date,
        slot_period_minutes: schedule.period.minutes(),
        slots,
    }
}

/// Decides whether a single slot starting at `starts_at` can be booked against
/// the snapshot. `exclude` skips one appointment, the one being moved.
///
/// Any time under a time-off window is BLACKED_OUT, whether or not it sits on
/// the slot grid.
pub fn evaluate_request(
    schedule: &DaySchedule,
    starts_at: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<(), SchedulingError> {
    if schedule.is_blacked_out(starts_at, starts_at + schedule.period.duration()) {
        return Err(SchedulingError::Conflict(ConflictKind::BlackedOut));
    }

    let slot = partition_day(schedule.date, schedule.window, schedule.period)
        .into_iter()
        .find(|(start, end)| *start <= starts_at && starts_at < *end);

    let Some((start, end)) = slot else {
        return Err(SchedulingError::Conflict(ConflictKind::OutsideWorkingHours));
    };

    if start != starts_at {
        return Err(SchedulingError::InvalidRequest(format!(
            "{} is not on a {}-minute slot boundary; nearest slot starts at {}",
            starts_at.time(),
            schedule.period.minutes(),
            start.time()
        )));
    }

    if schedule.is_blacked_out(start, end) {
        return Err(SchedulingError::Conflict(ConflictKind::BlackedOut));
    }

    if schedule.is_booked(start, end, exclude) {
        return Err(SchedulingError::Conflict(ConflictKind::SlotTaken));
    }

    Ok(())
}

/// Read side of the engine: cache first, then a fresh snapshot.
pub struct AvailabilityResolver {
    store: Arc<dyn SchedulingStore>,
    cache: AvailabilityCache,
    default_period: SlotPeriod,
}

impl AvailabilityResolver {
    pub fn new(store: Arc<dyn SchedulingStore>, cache: AvailabilityCache, default_period: SlotPeriod) -> Self {
        Self { store, cache, default_period }
    }

    #[instrument(skip(self))]
    pub async fn availability(&self, doctor_id: Uuid, date: NaiveDate) -> Result<DayAvailability, SchedulingError> {
        if let Some(day) = self.cache.get(doctor_id, date).await {
            debug!("Availability cache hit for doctor {} on {}", doctor_id, date);
            return Ok(day);
        }

        if !self.store.doctor_exists(doctor_id).await? {
            debug!("Unknown doctor {}, reporting an empty day", doctor_id);
            return Ok(resolve_day(&DaySchedule::closed(doctor_id, date, self.default_period)));
        }

        // Read the generation before loading so a mutation that lands
        // mid-computation causes this fill to be discarded.
        let generation = self.cache.generation(doctor_id).await;
        let schedule = DaySchedule::load(self.store.as_ref(), doctor_id, date, self.default_period).await?;
        let day = resolve_day(&schedule);

        self.cache.fill(day.clone(), generation).await;
        Ok(day)
    }

    pub async fn available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Slot>, SchedulingError> {
        Ok(self.availability(doctor_id, date).await?.available_slots())
    }
}
