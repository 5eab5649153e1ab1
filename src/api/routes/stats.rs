//! Pipeline counters

use axum::{Json, extract::State};

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::StatsResponse;

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let storage = state.pipeline.store.get_stats().await?;

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        pipeline: state.pipeline.health.stats(),
        storage,
    }))
}
