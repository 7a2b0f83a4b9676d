// libs/scheduling-cell/src/services/cache.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use performance_cell::{CacheStatsProvider, TtlCache};

use crate::models::DayAvailability;

/// Read-through cache of resolved days, scoped per doctor so that any rule,
/// time-off or ledger mutation can drop every cached date for that doctor.
#[derive(Clone)]
pub struct AvailabilityCache {
    inner: Arc<TtlCache<Uuid, NaiveDate, DayAvailability>>,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(TtlCache::new(ttl)) }
    }

    pub async fn get(&self, doctor_id: Uuid, date: NaiveDate) -> Option<DayAvailability> {
        self.inner.get(&doctor_id, &date).await
    }

    pub async fn generation(&self, doctor_id: Uuid) -> u64 {
        self.inner.generation(&doctor_id).await
    }

    pub async fn fill(&self, day: DayAvailability, generation: u64) -> bool {
        self.inner.insert_if_current(day.doctor_id, day.date, day, generation).await
    }

    pub async fn invalidate_doctor(&self, doctor_id: Uuid) {
        debug!("Invalidating cached availability for doctor {}", doctor_id);
        self.inner.invalidate_scope(&doctor_id).await;
    }

    pub fn stats_provider(&self) -> Arc<dyn CacheStatsProvider> {
        self.inner.clone()
    }
}
