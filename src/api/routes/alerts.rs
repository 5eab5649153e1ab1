//! Alert listing and acknowledgement

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::list_limit;
use crate::api::state::ApiState;
use crate::api::types::{AlertsResponse, ListQuery};

/// GET /api/v1/alerts?limit=50
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let alerts = state
        .pipeline
        .store
        .recent_alerts(list_limit(&query))
        .await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

/// POST /api/v1/alerts/:alert_id/acknowledge
///
/// `404` when the alert does not exist or is no longer NEW.
pub async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.pipeline.store.acknowledge_alert(&alert_id).await? {
        info!("alert {} acknowledged", alert_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "no unacknowledged alert with id '{alert_id}'"
        )))
    }
}
