//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::{AggregateRecord, Alert, DeadLetterRecord, SensorReading};

/// Query parameters for fetching readings within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    /// Source to query
    pub source_id: String,

    /// Restrict to one sensor (all sensors of the source if `None`)
    pub sensor_id: Option<String>,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (exclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

impl QueryRange {
    pub fn window(source_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            sensor_id: None,
            start,
            end,
            limit: None,
        }
    }

    pub fn contains(&self, reading: &SensorReading) -> bool {
        reading.source_id == self.source_id
            && self
                .sensor_id
                .as_ref()
                .is_none_or(|sensor| *sensor == reading.sensor_id)
            && reading.timestamp >= self.start
            && reading.timestamp < self.end
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// One backend can serve as time-series store, latest-value store, alert
/// store, dead-letter store and aggregate store at once, or a deployment can
/// split the sinks across several instances.
///
/// ## Idempotence
///
/// The broker delivers at least once, so every write here must tolerate
/// being repeated:
///
/// - `insert_reading` ignores a reading already stored for the same
///   `(source_id, sensor_id, timestamp)`
/// - `upsert_latest` never replaces a newer value with an older one
/// - `insert_dead_letter` is insert-if-absent on `message_id`
/// - `upsert_aggregate` overwrites on `(window_start, source_id)`
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append a reading to the time series
    async fn insert_reading(&self, reading: &SensorReading) -> StorageResult<()>;

    /// Replace the latest value of `(source_id, sensor_id)` unless the stored one is newer
    async fn upsert_latest(&self, reading: &SensorReading) -> StorageResult<()>;

    /// Latest value of one sensor
    async fn latest_value(
        &self,
        source_id: &str,
        sensor_id: &str,
    ) -> StorageResult<Option<SensorReading>>;

    /// Readings within `[start, end)`, oldest first
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SensorReading>>;

    /// Delete readings older than the specified timestamp
    ///
    /// Used for retention policy enforcement. Returns the number of readings deleted.
    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Record a freshly created alert
    async fn insert_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Move an alert from `New` to `Acknowledged`
    ///
    /// Returns `false` if the alert does not exist or was already acknowledged.
    async fn acknowledge_alert(&self, alert_id: &str) -> StorageResult<bool>;

    /// Most recent alerts, newest first
    async fn recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>>;

    /// Store a dead letter unless one with the same `message_id` exists
    ///
    /// Returns `true` if the record was inserted.
    async fn insert_dead_letter(&self, record: &DeadLetterRecord) -> StorageResult<bool>;

    async fn dead_letter(&self, message_id: &str) -> StorageResult<Option<DeadLetterRecord>>;

    /// Most recent dead letters, newest first
    async fn recent_dead_letters(&self, limit: usize) -> StorageResult<Vec<DeadLetterRecord>>;

    /// Insert or overwrite the aggregate of `(window_start, source_id)`
    async fn upsert_aggregate(&self, record: &AggregateRecord) -> StorageResult<()>;

    /// Aggregates whose window starts within `[start, end)`, oldest first
    async fn query_aggregates(
        &self,
        source_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<AggregateRecord>>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
