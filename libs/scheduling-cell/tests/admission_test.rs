// libs/scheduling-cell/tests/admission_test.rs
// End-to-end engine behaviour over the in-memory store with a controllable clock.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use uuid::Uuid;

use scheduling_cell::models::*;
use scheduling_cell::services::ManualClock;
use scheduling_cell::store::InMemorySchedulingStore;
use scheduling_cell::SchedulingState;
use shared_utils::test_utils::TestConfig;

struct Harness {
    state: Arc<SchedulingState>,
    clock: Arc<ManualClock>,
    doctor_id: Uuid,
}

/// 2030-01-07 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Doctor open Monday 09:00-12:00 with 30-minute slots; clock set a week earlier.
async fn harness() -> Harness {
    let store = Arc::new(InMemorySchedulingStore::new());
    let doctor_id = Uuid::new_v4();
    store.register_doctor(doctor_id).await;

    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2029, 12, 31, 8, 0, 0).unwrap()));
    let state = SchedulingState::with_store(TestConfig::default().to_arc(), store, clock.clone()).unwrap();

    state
        .calendar
        .set_working_hours(
            doctor_id,
            vec![WorkingHoursEntry { day_of_week: 1, start_time: Some(hm(9, 0)), end_time: Some(hm(12, 0)) }],
        )
        .await
        .unwrap();
    state.calendar.set_slot_period(doctor_id, 30).await.unwrap();

    Harness { state: Arc::new(state), clock, doctor_id }
}

fn booking(doctor_id: Uuid, time: NaiveTime) -> RequestAppointment {
    RequestAppointment {
        doctor_id,
        patient_id: Uuid::new_v4(),
        date: monday(),
        time,
        reason: Some("check-up".to_string()),
        emergency: false,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn basic_booking_scenario() {
    let h = harness().await;

    let day = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    let times: Vec<_> = day.slots.iter().map(|slot| slot.time).collect();
    assert_eq!(times, vec![hm(9, 0), hm(9, 30), hm(10, 0), hm(10, 30), hm(11, 0), hm(11, 30)]);
    assert!(day.slots.iter().all(|slot| slot.available && slot.duration_minutes == 30));

    let first = h.state.admission.request_appointment(booking(h.doctor_id, hm(10, 0))).await.unwrap();
    assert_eq!(first.appointment.status, AppointmentStatus::Pending);
    assert!(!first.replayed);

    let second = h.state.admission.request_appointment(booking(h.doctor_id, hm(10, 0))).await;
    assert_matches!(second, Err(SchedulingError::Conflict(ConflictKind::SlotTaken)));
}

#[tokio::test]
async fn eight_hour_day_partitions_into_32_slots() {
    let h = harness().await;
    h.state
        .calendar
        .set_working_hours(
            h.doctor_id,
            vec![WorkingHoursEntry { day_of_week: 1, start_time: Some(hm(9, 0)), end_time: Some(hm(17, 0)) }],
        )
        .await
        .unwrap();
    h.state.calendar.set_slot_period(h.doctor_id, 15).await.unwrap();

    let first = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    let again = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();

    assert_eq!(first.slots.len(), 32);
    assert_eq!(first, again);
    for pair in first.slots.windows(2) {
        assert_eq!(pair[0].ends_at, pair[1].starts_at);
    }
}

#[tokio::test]
async fn blackout_overlay_scenario() {
    let h = harness().await;
    h.state
        .time_off
        .create(
            h.doctor_id,
            CreateTimeOffRequest {
                starts_at: Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
                ends_at: Utc.with_ymd_and_hms(2030, 1, 7, 10, 30, 0).unwrap(),
                reason: Some("training".to_string()),
            },
        )
        .await
        .unwrap();

    let day = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    let ten = day.slots.iter().find(|slot| slot.time == hm(10, 0)).unwrap();
    assert!(!ten.available);
    assert_eq!(ten.reason, Some(UnavailableReason::Blackout));
    assert_eq!(day.available_slots().len(), 5);

    let denied = h.state.admission.request_appointment(booking(h.doctor_id, hm(10, 0))).await;
    assert_matches!(denied, Err(SchedulingError::Conflict(ConflictKind::BlackedOut)));
}

#[tokio::test]
async fn any_time_inside_time_off_is_blacked_out() {
    let h = harness().await;
    h.state
        .time_off
        .create(
            h.doctor_id,
            CreateTimeOffRequest {
                starts_at: Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
                ends_at: Utc.with_ymd_and_hms(2030, 1, 7, 10, 30, 0).unwrap(),
                reason: None,
            },
        )
        .await
        .unwrap();

    for time in [hm(10, 0), hm(10, 15), hm(10, 29)] {
        let denied = h.state.admission.request_appointment(booking(h.doctor_id, time)).await;
        assert_matches!(denied, Err(SchedulingError::Conflict(ConflictKind::BlackedOut)));
    }

    // Off-grid times clear of the window still fail the grid rule.
    let off_grid = h.state.admission.request_appointment(booking(h.doctor_id, hm(11, 15))).await;
    assert_matches!(off_grid, Err(SchedulingError::InvalidRequest(_)));
}

#[tokio::test]
async fn time_off_over_existing_booking_is_accepted_and_reported() {
    let h = harness().await;
    let booked = h.state.admission.request_appointment(booking(h.doctor_id, hm(11, 0))).await.unwrap();

    let window = h
        .state
        .time_off
        .create(
            h.doctor_id,
            CreateTimeOffRequest {
                starts_at: Utc.with_ymd_and_hms(2030, 1, 7, 11, 15, 0).unwrap(),
                ends_at: Utc.with_ymd_and_hms(2030, 1, 7, 12, 0, 0).unwrap(),
                reason: None,
            },
        )
        .await
        .unwrap();

    let conflicts = h.state.time_off.conflicting_appointments(h.doctor_id, window.id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, booked.appointment.id);

    // The booking itself is left alone.
    let still_there = h.state.ledger.get(booked.appointment.id).await.unwrap();
    assert_eq!(still_there.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn outside_hours_and_off_grid_requests_are_rejected() {
    let h = harness().await;

    let early = h.state.admission.request_appointment(booking(h.doctor_id, hm(8, 30))).await;
    assert_matches!(early, Err(SchedulingError::Conflict(ConflictKind::OutsideWorkingHours)));

    let closing = h.state.admission.request_appointment(booking(h.doctor_id, hm(12, 0))).await;
    assert_matches!(closing, Err(SchedulingError::Conflict(ConflictKind::OutsideWorkingHours)));

    let off_grid = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 10))).await;
    assert_matches!(off_grid, Err(SchedulingError::InvalidRequest(_)));

    let mut sunday = booking(h.doctor_id, hm(10, 0));
    sunday.date = NaiveDate::from_ymd_opt(2030, 1, 6).unwrap();
    let closed = h.state.admission.request_appointment(sunday).await;
    assert_matches!(closed, Err(SchedulingError::Conflict(ConflictKind::OutsideWorkingHours)));
}

#[tokio::test]
async fn concurrent_requests_admit_exactly_one() {
    let h = harness().await;

    let attempts = (0..16).map(|_| {
        let state = h.state.clone();
        let request = booking(h.doctor_id, hm(9, 30));
        tokio::spawn(async move { state.admission.request_appointment(request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|joined| joined.unwrap()).collect();

    let admitted = results.iter().filter(|result| result.is_ok()).count();
    let taken = results
        .iter()
        .filter(|result| matches!(result, Err(SchedulingError::Conflict(ConflictKind::SlotTaken))))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(taken, 15);
}

#[tokio::test]
async fn past_slots_need_an_emergency() {
    let h = harness().await;
    h.clock.set(Utc.with_ymd_and_hms(2030, 1, 7, 10, 5, 0).unwrap());

    let late = h.state.admission.request_appointment(booking(h.doctor_id, hm(10, 0))).await;
    assert_matches!(late, Err(SchedulingError::InvalidRequest(_)));

    let mut urgent = booking(h.doctor_id, hm(10, 0));
    urgent.emergency = true;
    let admitted = h.state.admission.request_appointment(urgent).await.unwrap();
    assert_eq!(admitted.appointment.status, AppointmentStatus::Emergency);

    // Emergencies still cannot double-book.
    let mut second = booking(h.doctor_id, hm(10, 0));
    second.emergency = true;
    let denied = h.state.admission.request_appointment(second).await;
    assert_matches!(denied, Err(SchedulingError::Conflict(ConflictKind::SlotTaken)));
}

#[tokio::test]
async fn cancellation_is_idempotent_and_frees_the_slot() {
    let h = harness().await;
    let booked = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
    let id = booked.appointment.id;

    let once = h.state.admission.cancel_appointment(id, Some("sick".to_string())).await.unwrap();
    let twice = h.state.admission.cancel_appointment(id, None).await.unwrap();
    assert_eq!(once.status, AppointmentStatus::Cancelled);
    assert_eq!(twice, once);

    let day = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    assert!(day.slots[0].available);

    h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
}

#[tokio::test]
async fn completed_appointments_cannot_be_cancelled() {
    let h = harness().await;
    let booked = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
    let id = booked.appointment.id;

    h.state.admission.update_status(id, AppointmentStatus::Confirmed).await.unwrap();
    h.state.admission.update_status(id, AppointmentStatus::Completed).await.unwrap();

    let cancel = h.state.admission.cancel_appointment(id, None).await;
    assert_matches!(cancel, Err(SchedulingError::InvalidRequest(_)));

    let reopen = h.state.admission.update_status(id, AppointmentStatus::Pending).await;
    assert_matches!(reopen, Err(SchedulingError::InvalidRequest(_)));
}

#[tokio::test]
async fn admission_is_visible_to_the_next_read() {
    let h = harness().await;

    // Warm the cache, then book through it.
    let before = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    assert!(before.slots.iter().all(|slot| slot.available));

    h.state.admission.request_appointment(booking(h.doctor_id, hm(11, 30))).await.unwrap();

    let after = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    let last = after.slots.last().unwrap();
    assert!(!last.available);
    assert_eq!(last.reason, Some(UnavailableReason::Booked));
}

#[tokio::test]
async fn slot_period_change_is_visible_immediately() {
    let h = harness().await;
    assert_eq!(h.state.resolver.availability(h.doctor_id, monday()).await.unwrap().slots.len(), 6);

    h.state.calendar.set_slot_period(h.doctor_id, 60).await.unwrap();
    assert_eq!(h.state.resolver.availability(h.doctor_id, monday()).await.unwrap().slots.len(), 3);

    let invalid = h.state.calendar.set_slot_period(h.doctor_id, 25).await;
    assert_matches!(invalid, Err(SchedulingError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn reallocation_of_expired_pending() {
    let h = harness().await;
    let booked = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
    let id = booked.appointment.id;

    // The slot passes without anyone confirming it.
    h.clock.set(Utc.with_ymd_and_hms(2030, 1, 7, 9, 45, 0).unwrap());
    let expired = h.state.ledger.expired_pending(h.doctor_id).await.unwrap();
    assert_eq!(expired.iter().map(|apt| apt.id).collect::<Vec<_>>(), vec![id]);
    assert!(h.state.ledger.view(id).await.unwrap().expired_pending);

    let moved = h
        .state
        .admission
        .reallocate(
            id,
            ReallocateRequest { date: monday(), time: hm(11, 0), status: Some(AppointmentStatus::Confirmed) },
        )
        .await
        .unwrap();

    assert_eq!(moved.status, AppointmentStatus::Confirmed);
    assert_eq!(moved.scheduled_at, Utc.with_ymd_and_hms(2030, 1, 7, 11, 0, 0).unwrap());
    assert!(h.state.ledger.expired_pending(h.doctor_id).await.unwrap().is_empty());

    let day = h.state.resolver.availability(h.doctor_id, monday()).await.unwrap();
    assert!(day.slots[0].available);
    assert_eq!(day.slots[4].reason, Some(UnavailableReason::Booked));
}

#[tokio::test]
async fn reallocation_checks_the_target_slot() {
    let h = harness().await;
    let a = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
    h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 30))).await.unwrap();

    let onto_taken = h
        .state
        .admission
        .reallocate(a.appointment.id, ReallocateRequest { date: monday(), time: hm(9, 30), status: None })
        .await;
    assert_matches!(onto_taken, Err(SchedulingError::Conflict(ConflictKind::SlotTaken)));

    // Staying put is not a conflict with itself.
    let same = h
        .state
        .admission
        .reallocate(a.appointment.id, ReallocateRequest { date: monday(), time: hm(9, 0), status: None })
        .await;
    assert!(same.is_ok());

    h.clock.set(Utc.with_ymd_and_hms(2030, 1, 7, 11, 0, 0).unwrap());
    let into_past = h
        .state
        .admission
        .reallocate(a.appointment.id, ReallocateRequest { date: monday(), time: hm(10, 0), status: None })
        .await;
    assert_matches!(into_past, Err(SchedulingError::InvalidRequest(_)));

    let as_emergency = h
        .state
        .admission
        .reallocate(
            a.appointment.id,
            ReallocateRequest { date: monday(), time: hm(10, 0), status: Some(AppointmentStatus::Emergency) },
        )
        .await
        .unwrap();
    assert_eq!(as_emergency.status, AppointmentStatus::Emergency);
}

#[tokio::test]
async fn idempotency_key_replays_the_original_booking() {
    let h = harness().await;
    let mut request = booking(h.doctor_id, hm(10, 30));
    request.idempotency_key = Some("checkout-7f3a".to_string());

    let first = h.state.admission.request_appointment(request.clone()).await.unwrap();
    let retry = h.state.admission.request_appointment(request.clone()).await.unwrap();
    assert!(retry.replayed);
    assert_eq!(retry.appointment.id, first.appointment.id);

    let mut other_slot = request.clone();
    other_slot.time = hm(11, 0);
    let reused = h.state.admission.request_appointment(other_slot).await;
    assert_matches!(reused, Err(SchedulingError::InvalidRequest(_)));
}

#[tokio::test]
async fn idempotent_retry_after_the_slot_started_returns_the_booking() {
    let h = harness().await;
    h.clock.set(Utc.with_ymd_and_hms(2030, 1, 7, 9, 55, 0).unwrap());

    let mut request = booking(h.doctor_id, hm(10, 0));
    request.idempotency_key = Some("k1".to_string());
    let first = h.state.admission.request_appointment(request.clone()).await.unwrap();
    assert!(!first.replayed);

    h.clock.advance(Duration::minutes(10));
    let retry = h.state.admission.request_appointment(request.clone()).await.unwrap();
    assert!(retry.replayed);
    assert_eq!(retry.appointment.id, first.appointment.id);

    // A fresh key for the same started slot is still refused.
    request.idempotency_key = Some("k2".to_string());
    let late = h.state.admission.request_appointment(request).await;
    assert_matches!(late, Err(SchedulingError::InvalidRequest(_)));
}

#[tokio::test]
async fn unknown_doctor_has_an_empty_day_but_cannot_be_booked() {
    let h = harness().await;
    let stranger = Uuid::new_v4();

    let day = h.state.resolver.availability(stranger, monday()).await.unwrap();
    assert!(day.slots.is_empty());

    let denied = h.state.admission.request_appointment(booking(stranger, hm(10, 0))).await;
    assert_matches!(denied, Err(SchedulingError::NotFound(_)));
}

#[tokio::test]
async fn schedule_events_follow_mutations() {
    let h = harness().await;
    let mut events = h.state.events.subscribe();

    let booked = h.state.admission.request_appointment(booking(h.doctor_id, hm(9, 0))).await.unwrap();
    h.state.admission.cancel_appointment(booked.appointment.id, None).await.unwrap();

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.kind, ScheduleEventKind::AppointmentBooked);
    assert_eq!(second.kind, ScheduleEventKind::AppointmentCancelled);
    assert_eq!(second.subject_id, Some(booked.appointment.id));
}

#[tokio::test]
async fn working_hours_reject_half_open_days() {
    let h = harness().await;
    let result = h
        .state
        .calendar
        .set_working_hours(
            h.doctor_id,
            vec![WorkingHoursEntry { day_of_week: 2, start_time: Some(hm(9, 0)), end_time: None }],
        )
        .await;
    assert_matches!(result, Err(SchedulingError::InvalidConfiguration(_)));

    let duplicate = h
        .state
        .calendar
        .set_working_hours(
            h.doctor_id,
            vec![
                WorkingHoursEntry { day_of_week: 2, start_time: None, end_time: None },
                WorkingHoursEntry { day_of_week: 2, start_time: None, end_time: None },
            ],
        )
        .await;
    assert_matches!(duplicate, Err(SchedulingError::InvalidConfiguration(_)));

    let hours = h.state.calendar.working_hours(h.doctor_id).await.unwrap();
    assert_eq!(hours.len(), 1);
}
