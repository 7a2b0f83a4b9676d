// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::models::{
    Appointment, CancelAppointmentRequest, CreateTimeOffRequest, DayAvailability,
    ReallocateRequest, RequestAppointment, SetSlotPeriodRequest, SetWorkingHoursRequest,
    UpdateStatusRequest, UpdateTimeOffRequest,
};
use crate::state::SchedulingState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    #[serde(default)]
    pub only_available: bool,
}

// ==============================================================================
// AUTHORIZATION HELPERS
// ==============================================================================

fn require_manager(user: &User, doctor_id: Uuid) -> Result<(), AppError> {
    if user.can_manage_doctor(doctor_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Not authorized to manage this doctor's schedule".to_string(),
        ))
    }
}

fn require_access(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is(appointment.patient_id) || user.can_manage_doctor(appointment.doctor_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to access this appointment".to_string()))
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

pub async fn get_availability(
    State(state): State<Arc<SchedulingState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<DayAvailability>, AppError> {
    let mut day = state.resolver.availability(doctor_id, query.date).await?;
    if query.only_available {
        day.slots.retain(|slot| slot.available);
    }
    Ok(Json(day))
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

pub async fn request_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<RequestAppointment>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    match user.role() {
        Role::Patient => {
            if !user.is(request.patient_id) {
                return Err(AppError::Forbidden(
                    "Patients can only book appointments for themselves".to_string(),
                ));
            }
            if request.emergency {
                return Err(AppError::Forbidden(
                    "Emergency bookings are made by clinic staff".to_string(),
                ));
            }
        }
        _ => require_manager(&user, request.doctor_id)?,
    }

    let outcome = state.admission.request_appointment(request).await?;
    let status = if outcome.replayed { StatusCode::OK } else { StatusCode::CREATED };

    Ok((
        status,
        Json(json!({
            "appointment_id": outcome.appointment.id,
            "status": outcome.appointment.status,
            "appointment": state.ledger.to_view(outcome.appointment),
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let view = state.ledger.view(appointment_id).await?;
    require_access(&user, &view.appointment)?;
    Ok(Json(json!(view)))
}

pub async fn update_appointment_status(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let current = state.ledger.get(appointment_id).await?;
    require_manager(&user, current.doctor_id)?;

    let appointment = state.admission.update_status(appointment_id, request.status).await?;
    Ok(Json(json!({ "appointment": state.ledger.to_view(appointment) })))
}

pub async fn reallocate_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ReallocateRequest>,
) -> Result<Json<Value>, AppError> {
    let current = state.ledger.get(appointment_id).await?;
    require_manager(&user, current.doctor_id)?;

    let appointment = state.admission.reallocate(appointment_id, request).await?;
    Ok(Json(json!({ "appointment": state.ledger.to_view(appointment) })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let current = state.ledger.get(appointment_id).await?;
    require_access(&user, &current)?;

    let reason = request.and_then(|Json(body)| body.reason);
    let appointment = state.admission.cancel_appointment(appointment_id, reason).await?;
    Ok(Json(json!({ "appointment": state.ledger.to_view(appointment) })))
}

pub async fn get_expired_pending(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;

    let appointments = state.ledger.expired_pending(doctor_id).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "appointments": appointments,
        "total": appointments.len(),
    })))
}

// ==============================================================================
// TIME OFF
// ==============================================================================

pub async fn list_time_off(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;
    let windows = state.time_off.list(doctor_id).await?;
    Ok(Json(json!({ "doctor_id": doctor_id, "time_off": windows })))
}

pub async fn create_time_off(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateTimeOffRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_manager(&user, doctor_id)?;
    let window = state.time_off.create(doctor_id, request).await?;
    Ok((StatusCode::CREATED, Json(json!(window))))
}

pub async fn update_time_off(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path((doctor_id, time_off_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateTimeOffRequest>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;
    let window = state.time_off.update(doctor_id, time_off_id, request).await?;
    Ok(Json(json!(window)))
}

pub async fn delete_time_off(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path((doctor_id, time_off_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    require_manager(&user, doctor_id)?;
    state.time_off.delete(doctor_id, time_off_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_time_off_conflicts(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path((doctor_id, time_off_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;
    let appointments = state.time_off.conflicting_appointments(doctor_id, time_off_id).await?;
    Ok(Json(json!({
        "time_off_id": time_off_id,
        "appointments": appointments,
        "total": appointments.len(),
    })))
}

// ==============================================================================
// CALENDAR RULES
// ==============================================================================

pub async fn get_working_hours(
    State(state): State<Arc<SchedulingState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let hours = state.calendar.working_hours(doctor_id).await?;
    Ok(Json(json!({ "doctor_id": doctor_id, "hours": hours })))
}

pub async fn set_working_hours(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<SetWorkingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;
    let hours = state.calendar.set_working_hours(doctor_id, request.hours).await?;
    Ok(Json(json!({ "doctor_id": doctor_id, "hours": hours })))
}

pub async fn get_slot_period(
    State(state): State<Arc<SchedulingState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let period = state.calendar.slot_period(doctor_id).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "period_minutes": period.minutes(),
        "capacity_per_hour": period.capacity_per_hour(),
    })))
}

pub async fn set_slot_period(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<SetSlotPeriodRequest>,
) -> Result<Json<Value>, AppError> {
    require_manager(&user, doctor_id)?;
    let setting = state.calendar.set_slot_period(doctor_id, request.period_minutes).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "period_minutes": setting.period_minutes.minutes(),
        "capacity_per_hour": setting.period_minutes.capacity_per_hour(),
        "updated_at": setting.updated_at,
    })))
}

// ==============================================================================
// EVENTS
// ==============================================================================

/// Server-sent stream of changes to one doctor's schedule.
pub async fn stream_schedule_events(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    require_manager(&user, doctor_id)?;
    debug!("Opening schedule event stream for doctor {}", doctor_id);

    let receiver = state.events.subscribe();
    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) if event.doctor_id == doctor_id => {
                    let sse = Event::default().event("schedule_change").json_data(&event);
                    return Some((sse, receiver));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream for doctor {} skipped {} events", doctor_id, skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
