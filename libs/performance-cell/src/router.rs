use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers::{get_performance_stats, PerformanceHandlers};
use crate::services::CacheStatsProvider;

pub fn create_performance_router(cache: Arc<dyn CacheStatsProvider>) -> Router {
    let handlers = Arc::new(PerformanceHandlers::new(cache));

    Router::new()
        .route("/stats", get(get_performance_stats))
        .with_state(handlers)
}
