//! Health check endpoint

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};

use crate::api::state::ApiState;
use crate::api::types::{HealthResponse, StoreHealth};
use crate::storage::StorageBackend;

/// GET /api/v1/health
///
/// `503` once a dead letter could not be persisted, since messages have been
/// lost at that point. An unhealthy store only degrades the status; the
/// pipeline keeps redelivering until it comes back.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let pipeline = &state.pipeline;

    let mut stores = vec![probe("store", &pipeline.store).await];
    if !Arc::ptr_eq(&pipeline.store, &pipeline.latest_store) {
        stores.push(probe("latest_value_store", &pipeline.latest_store).await);
    }

    let persist_failures = pipeline.health.stats().dead_letter_persist_failures;
    let (code, status) = if !pipeline.health.is_healthy() {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if stores.iter().any(|store| !store.healthy) {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    let response = HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        stores,
        dead_letter_persist_failures: persist_failures,
        breakers: pipeline.breakers.reports(),
    };

    (code, Json(response))
}

async fn probe(name: &str, backend: &Arc<dyn StorageBackend>) -> StoreHealth {
    match backend.health_check().await {
        Ok(status) => StoreHealth {
            name: name.to_string(),
            healthy: status.healthy,
            message: status.message,
        },
        Err(e) => StoreHealth {
            name: name.to_string(),
            healthy: false,
            message: e.to_string(),
        },
    }
}
