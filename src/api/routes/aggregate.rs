//! Aggregation trigger for an external timer

use axum::{Json, extract::State};
use tracing::info;

use crate::AggregateRecord;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::AggregateRequest;

/// POST /api/v1/aggregate
///
/// Computes and upserts the aggregate of one window. Calling it twice for the
/// same window overwrites the first result.
pub async fn trigger_aggregate(
    State(state): State<ApiState>,
    Json(request): Json<AggregateRequest>,
) -> ApiResult<Json<AggregateRecord>> {
    if request.source_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("source_id is empty".to_string()));
    }

    info!(
        "aggregating {} over [{}, {})",
        request.source_id, request.window_start, request.window_end
    );

    let record = state
        .pipeline
        .aggregator
        .aggregate(request.window_start, request.window_end, &request.source_id)
        .await?;

    Ok(Json(record))
}
