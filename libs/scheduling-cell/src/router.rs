// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::SchedulingState;

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    // Availability is public so patients can browse before signing in
    let public_routes = Router::new()
        .route("/doctors/{doctor_id}/availability", get(handlers::get_availability));

    let protected_routes = Router::new()
        // Booking ledger
        .route("/appointments", post(handlers::request_appointment))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/appointments/{appointment_id}/reallocate", patch(handlers::reallocate_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/doctors/{doctor_id}/appointments/expired-pending", get(handlers::get_expired_pending))

        // Time off
        .route("/doctors/{doctor_id}/time-off", get(handlers::list_time_off).post(handlers::create_time_off))
        .route(
            "/doctors/{doctor_id}/time-off/{time_off_id}",
            patch(handlers::update_time_off).delete(handlers::delete_time_off),
        )
        .route("/doctors/{doctor_id}/time-off/{time_off_id}/conflicts", get(handlers::get_time_off_conflicts))

        // Calendar rules
        .route("/doctors/{doctor_id}/working-hours", get(handlers::get_working_hours).put(handlers::set_working_hours))
        .route("/doctors/{doctor_id}/slot-period", get(handlers::get_slot_period).put(handlers::set_slot_period))

        // Live updates
        .route("/doctors/{doctor_id}/events", get(handlers::stream_schedule_events))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
