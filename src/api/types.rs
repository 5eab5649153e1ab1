//! Request and response bodies of the HTTP surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerReport;
use crate::deadletter::PipelineStats;
use crate::{Alert, DeadLetterRecord};

/// Broker push envelope
///
/// Both snake_case and camelCase field names are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,

    /// 1-based; treated as 1 when the broker does not send it
    #[serde(default, alias = "deliveryAttempt")]
    pub delivery_attempt: Option<u32>,

    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    #[serde(alias = "messageId")]
    pub message_id: String,

    /// Base64 encoded reading
    #[serde(default)]
    pub data: String,
}

/// Body of `POST /api/v1/aggregate`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregateRequest {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub source_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub name: String,
    pub healthy: bool,
    pub message: String,
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` (a store is unhealthy) or `unhealthy` (dead letters were lost)
    pub status: String,
    pub timestamp: String,
    pub stores: Vec<StoreHealth>,
    pub dead_letter_persist_failures: u64,
    pub breakers: Vec<BreakerReport>,
}

/// Response for GET /api/v1/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub pipeline: PipelineStats,
    pub storage: String,
}

/// Response for GET /api/v1/dead-letters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLettersResponse {
    pub count: usize,
    pub dead_letters: Vec<DeadLetterRecord>,
}

/// Response for GET /api/v1/alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<Alert>,
}
