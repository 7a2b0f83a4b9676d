// libs/scheduling-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{Appointment, SlotPeriodSetting, TimeOff, WorkingHours};
use crate::store::{SchedulingStore, StoreError};

/// PostgREST-backed store. The `appointments_active_slot` partial unique index
/// enforces the one-active-booking-per-start rule across processes; its 409 is
/// surfaced as `StoreError::UniqueViolation`.
pub struct SupabaseSchedulingStore {
    supabase: Arc<SupabaseClient>,
}

fn ts(at: DateTime<Utc>) -> String {
    // Always a `Z` suffix so the value survives a query string unescaped.
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

fn first_row<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, StoreError> {
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}

impl SupabaseSchedulingStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn get_rows(&self, path: &str) -> Result<Vec<Value>, StoreError> {
        debug!("PostgREST select {}", path);
        Ok(self.supabase.request(Method::GET, path, None, None).await?)
    }

    async fn write_rows(
        &self,
        method: Method,
        path: &str,
        body: Value,
        upsert: bool,
    ) -> Result<Vec<Value>, StoreError> {
        let headers = if upsert {
            SupabaseClient::upsert_representation()
        } else {
            SupabaseClient::return_representation()
        };
        Ok(self
            .supabase
            .request_with_headers(method, path, None, Some(body), Some(headers))
            .await?)
    }

    fn single<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Result<T, StoreError> {
        first_row(rows)?.ok_or_else(|| StoreError::NotFound(what.to_string()))
    }
}

#[async_trait]
impl SchedulingStore for SupabaseSchedulingStore {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/doctors?id=eq.{}&select=id", doctor_id);
        Ok(!self.get_rows(&path).await?.is_empty())
    }

    async fn list_working_hours(&self, doctor_id: Uuid) -> Result<Vec<WorkingHours>, StoreError> {
        let path = format!(
            "/rest/v1/doctor_working_hours?doctor_id=eq.{}&order=day_of_week.asc",
            doctor_id
        );
        decode_rows(self.get_rows(&path).await?)
    }

    async fn working_hours_for_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
    ) -> Result<Option<WorkingHours>, StoreError> {
        let path = format!(
            "/rest/v1/doctor_working_hours?doctor_id=eq.{}&day_of_week=eq.{}",
            doctor_id, day_of_week
        );
        first_row(self.get_rows(&path).await?)
    }

    async fn upsert_working_hours(
        &self,
        hours: Vec<WorkingHours>,
    ) -> Result<Vec<WorkingHours>, StoreError> {
        if hours.is_empty() {
            return Ok(hours);
        }
        let body = serde_json::to_value(&hours)?;
        let rows = self
            .write_rows(
                Method::POST,
                "/rest/v1/doctor_working_hours?on_conflict=doctor_id,day_of_week",
                body,
                true,
            )
            .await?;
        decode_rows(rows)
    }

    async fn slot_period(&self, doctor_id: Uuid) -> Result<Option<SlotPeriodSetting>, StoreError> {
        let path = format!("/rest/v1/doctor_slot_periods?doctor_id=eq.{}", doctor_id);
        first_row(self.get_rows(&path).await?)
    }

    async fn set_slot_period(
        &self,
        setting: SlotPeriodSetting,
    ) -> Result<SlotPeriodSetting, StoreError> {
        let rows = self
            .write_rows(
                Method::POST,
                "/rest/v1/doctor_slot_periods?on_conflict=doctor_id",
                serde_json::to_value(&setting)?,
                true,
            )
            .await?;
        Self::single(rows, "Slot period")
    }

    async fn list_time_off(&self, doctor_id: Uuid) -> Result<Vec<TimeOff>, StoreError> {
        let path = format!(
            "/rest/v1/doctor_time_off?doctor_id=eq.{}&order=starts_at.asc",
            doctor_id
        );
        decode_rows(self.get_rows(&path).await?)
    }

    async fn time_off_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeOff>, StoreError> {
        let path = format!(
            "/rest/v1/doctor_time_off?doctor_id=eq.{}&starts_at=lt.{}&ends_at=gt.{}&order=starts_at.asc",
            doctor_id,
            ts(to),
            ts(from)
        );
        decode_rows(self.get_rows(&path).await?)
    }

    async fn get_time_off(&self, time_off_id: Uuid) -> Result<Option<TimeOff>, StoreError> {
        let path = format!("/rest/v1/doctor_time_off?id=eq.{}", time_off_id);
        first_row(self.get_rows(&path).await?)
    }

    async fn insert_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError> {
        let rows = self
            .write_rows(
                Method::POST,
                "/rest/v1/doctor_time_off",
                serde_json::to_value(&time_off)?,
                false,
            )
            .await?;
        Self::single(rows, "Time off")
    }

    async fn update_time_off(&self, time_off: TimeOff) -> Result<TimeOff, StoreError> {
        let path = format!("/rest/v1/doctor_time_off?id=eq.{}", time_off.id);
        let body = json!({
            "starts_at": time_off.starts_at,
            "ends_at": time_off.ends_at,
            "reason": time_off.reason,
            "updated_at": time_off.updated_at,
        });
        let rows = self.write_rows(Method::PATCH, &path, body, false).await?;
        Self::single(rows, "Time off")
    }

    async fn delete_time_off(&self, time_off_id: Uuid) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/doctor_time_off?id=eq.{}", time_off_id);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        first_row(self.get_rows(&path).await?)
    }

    async fn find_by_idempotency_key(
        &self,
        doctor_id: Uuid,
        key: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        // Keys are restricted to URL-safe characters before they get here.
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&idempotency_key=eq.{}&status=neq.cancelled",
            doctor_id, key
        );
        first_row(self.get_rows(&path).await?)
    }

    async fn active_appointments_between(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&scheduled_at=gte.{}&scheduled_at=lt.{}&status=neq.cancelled&order=scheduled_at.asc",
            doctor_id,
            ts(from),
            ts(to)
        );
        decode_rows(self.get_rows(&path).await?)
    }

    async fn pending_before(
        &self,
        doctor_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=eq.pending&scheduled_at=lt.{}&order=scheduled_at.asc",
            doctor_id,
            ts(before)
        );
        decode_rows(self.get_rows(&path).await?)
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let rows = self
            .write_rows(
                Method::POST,
                "/rest/v1/appointments",
                serde_json::to_value(&appointment)?,
                false,
            )
            .await?;
        Self::single(rows, "Appointment")
    }

    async fn update_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
        let body = json!({
            "scheduled_at": appointment.scheduled_at,
            "status": appointment.status,
            "cancellation_reason": appointment.cancellation_reason,
            "updated_at": appointment.updated_at,
        });
        let rows = self.write_rows(Method::PATCH, &path, body, false).await?;
        Self::single(rows, "Appointment")
    }
}
