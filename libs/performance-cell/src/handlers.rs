use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::{PerformanceStats, PerformanceError};
use crate::services::CacheStatsProvider;

pub struct PerformanceHandlers {
    cache: Option<Arc<dyn CacheStatsProvider>>,
}

impl PerformanceHandlers {
    pub fn new(cache: Arc<dyn CacheStatsProvider>) -> Self {
        Self { cache: Some(cache) }
    }

    /// Handlers with no cache attached; `/stats` answers 503.
    pub fn detached() -> Self {
        Self { cache: None }
    }
}

pub async fn get_performance_stats(
    State(handlers): State<Arc<PerformanceHandlers>>,
) -> Result<Json<PerformanceStats>, PerformanceError> {
    let cache = handlers.cache.as_ref().ok_or(PerformanceError::MetricsUnavailable)?;

    Ok(Json(PerformanceStats {
        cache_stats: cache.cache_stats().await,
        generated_at: chrono::Utc::now(),
    }))
}

use axum::{response::IntoResponse, http::StatusCode};

impl IntoResponse for PerformanceError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            PerformanceError::MetricsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Same body shape as the scheduling routes' errors.
        (status, Json(serde_json::json!({
            "error": self.to_string(),
            "kind": "METRICS_UNAVAILABLE",
        }))).into_response()
    }
}
