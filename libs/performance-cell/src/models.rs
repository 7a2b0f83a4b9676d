use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub total_entries: u64,
    pub ttl_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub cache_stats: CacheStats,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PerformanceError {
    #[error("Performance metrics unavailable")]
    MetricsUnavailable,
}
