// libs/scheduling-cell/src/services/ledger.rs
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Appointment, SchedulingError};
use crate::services::clock::Clock;
use crate::store::SchedulingStore;

/// Appointment as returned to clients, with the clock-derived expiry flag.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub expired_pending: bool,
}

/// Read access to booked appointments.
pub struct BookingLedger {
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
}

impl BookingLedger {
    pub fn new(store: Arc<dyn SchedulingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("Appointment".to_string()))
    }

    pub async fn view(&self, appointment_id: Uuid) -> Result<AppointmentView, SchedulingError> {
        let appointment = self.get(appointment_id).await?;
        Ok(self.to_view(appointment))
    }

    pub fn to_view(&self, appointment: Appointment) -> AppointmentView {
        let expired_pending = appointment.is_expired_pending(self.clock.now());
        AppointmentView { appointment, expired_pending }
    }

    /// Pending appointments whose time has passed, oldest first.
    pub async fn expired_pending(&self, doctor_id: Uuid) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.store.pending_before(doctor_id, self.clock.now()).await?)
    }
}
