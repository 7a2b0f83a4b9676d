use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use performance_cell::create_performance_router;
use scheduling_cell::{scheduling_routes, SchedulingState};

pub fn create_router(state: Arc<SchedulingState>) -> Router {
    Router::new()
        .route("/", get(|| async { "CareSlot scheduling API is running!" }))
        .nest("/performance", create_performance_router(state.cache.stats_provider()))
        .merge(scheduling_routes(state))
}
