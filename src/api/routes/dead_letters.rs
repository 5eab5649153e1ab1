//! Dead letter inspection

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::DeadLetterRecord;
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::list_limit;
use crate::api::state::ApiState;
use crate::api::types::{DeadLettersResponse, ListQuery};

/// GET /api/v1/dead-letters?limit=50
pub async fn list_dead_letters(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<DeadLettersResponse>> {
    let dead_letters = state
        .pipeline
        .store
        .recent_dead_letters(list_limit(&query))
        .await?;

    Ok(Json(DeadLettersResponse {
        count: dead_letters.len(),
        dead_letters,
    }))
}

/// GET /api/v1/dead-letters/:message_id
pub async fn get_dead_letter(
    State(state): State<ApiState>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<DeadLetterRecord>> {
    state
        .pipeline
        .store
        .dead_letter(&message_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no dead letter for message '{message_id}'")))
}
