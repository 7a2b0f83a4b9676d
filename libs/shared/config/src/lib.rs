use std::env;
use tracing::warn;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 120;
pub const DEFAULT_SLOT_PERIOD_MINUTES: u32 = 15;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub availability_cache_ttl_secs: u64,
    pub default_slot_period_minutes: u32,
    /// Doctors the in-memory backend accepts; read from `SCHEDULING_DOCTOR_IDS`.
    pub scheduling_doctor_ids: Vec<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            });
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_SERVICE_ROLE_KEY not set, falling back to anon key");
                supabase_anon_key.clone()
            });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_JWT_SECRET not set, using empty value");
                String::new()
            });

        let storage_backend = match env::var("SCHEDULING_STORAGE").ok().as_deref() {
            Some("supabase") => StorageBackend::Supabase,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                warn!("Unknown SCHEDULING_STORAGE '{}', using in-memory storage", other);
                StorageBackend::Memory
            }
            None if !supabase_url.is_empty() => StorageBackend::Supabase,
            None => StorageBackend::Memory,
        };

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_service_role_key,
            supabase_jwt_secret,
            storage_backend,
            availability_cache_ttl_secs: parse_or_default(
                "AVAILABILITY_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            ),
            default_slot_period_minutes: parse_or_default(
                "DEFAULT_SLOT_PERIOD_MINUTES",
                DEFAULT_SLOT_PERIOD_MINUTES,
            ),
            scheduling_doctor_ids: parse_list("SCHEDULING_DOCTOR_IDS"),
            port: parse_or_default("PORT", DEFAULT_PORT),
        };

        if config.storage_backend == StorageBackend::Memory && config.scheduling_doctor_ids.is_empty() {
            warn!("SCHEDULING_DOCTOR_IDS not set, in-memory storage will know no doctors");
        }

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// JWT validation needs a secret; the Supabase backend additionally needs a URL and key.
    pub fn is_configured(&self) -> bool {
        let auth_ready = !self.supabase_jwt_secret.is_empty();
        match self.storage_backend {
            StorageBackend::Memory => auth_ready,
            StorageBackend::Supabase => {
                auth_ready
                    && !self.supabase_url.is_empty()
                    && !self.supabase_service_role_key.is_empty()
            }
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Comma-separated values, blanks skipped.
fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
