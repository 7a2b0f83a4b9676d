use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Roles recognised by the scheduling routes. Anything else is treated as a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Doctor,
    SlotAdmin,
    Admin,
}

impl Role {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("doctor") => Role::Doctor,
            Some("slot_admin") | Some("hospital") => Role::SlotAdmin,
            Some("admin") => Role::Admin,
            _ => Role::Patient,
        }
    }

    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Patient)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::parse(self.role.as_deref())
    }

    pub fn is(&self, id: Uuid) -> bool {
        self.id == id.to_string()
    }

    /// Doctors a hospital slot-admin acts for, taken from `user_metadata.doctor_ids`.
    pub fn managed_doctor_ids(&self) -> Vec<Uuid> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("doctor_ids"))
            .and_then(|ids| ids.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str())
                    .filter_map(|id| Uuid::parse_str(id).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether this user may manage the schedule of `doctor_id`.
    pub fn can_manage_doctor(&self, doctor_id: Uuid) -> bool {
        match self.role() {
            Role::Admin => true,
            Role::Doctor => self.is(doctor_id),
            Role::SlotAdmin => self.managed_doctor_ids().contains(&doctor_id),
            Role::Patient => false,
        }
    }
}
