//! In-memory storage backend (no persistence)
//!
//! It's useful for:
//! - Testing without database dependencies
//! - `backend: none` deployments
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Readings are kept in a ring buffer per source

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::StorageResult;
use crate::{AggregateRecord, Alert, AlertStatus, DeadLetterRecord, SensorReading};

/// Maximum readings to keep in memory per source
const MAX_READINGS_PER_SOURCE: usize = 100_000;

#[derive(Default)]
struct Tables {
    /// Time series grouped by source_id, ordered by arrival
    readings: HashMap<String, VecDeque<SensorReading>>,

    /// Keyed by (source_id, sensor_id)
    latest: HashMap<(String, String), SensorReading>,

    /// Insertion order preserved for "newest first" listings
    alerts: Vec<Alert>,

    dead_letters: Vec<DeadLetterRecord>,

    /// Keyed by (window_start, source_id)
    aggregates: BTreeMap<(DateTime<Utc>, String), AggregateRecord>,
}

/// In-memory storage backend
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_reading(&self, reading: &SensorReading) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let series = tables
            .readings
            .entry(reading.source_id.clone())
            .or_default();

        let duplicate = series.iter().any(|r| {
            r.sensor_id == reading.sensor_id && r.timestamp == reading.timestamp
        });
        if duplicate {
            debug!("duplicate reading for {}/{} ignored", reading.source_id, reading.sensor_id);
            return Ok(());
        }

        series.push_back(reading.clone());
        if series.len() > MAX_READINGS_PER_SOURCE {
            series.pop_front();
        }
        Ok(())
    }

    async fn upsert_latest(&self, reading: &SensorReading) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let key = (reading.source_id.clone(), reading.sensor_id.clone());

        match tables.latest.get(&key) {
            Some(current) if current.timestamp > reading.timestamp => {
                debug!("stale latest value for {}/{} ignored", key.0, key.1);
            }
            _ => {
                tables.latest.insert(key, reading.clone());
            }
        }
        Ok(())
    }

    async fn latest_value(
        &self,
        source_id: &str,
        sensor_id: &str,
    ) -> StorageResult<Option<SensorReading>> {
        let tables = self.tables.read().await;
        Ok(tables
            .latest
            .get(&(source_id.to_string(), sensor_id.to_string()))
            .cloned())
    }

    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SensorReading>> {
        debug!("querying in-memory storage for {}", query.source_id);

        let tables = self.tables.read().await;
        let mut readings: Vec<SensorReading> = tables
            .readings
            .get(&query.source_id)
            .map(|series| series.iter().filter(|r| query.contains(r)).cloned().collect())
            .unwrap_or_default();

        readings.sort_by_key(|r| r.timestamp);
        if let Some(limit) = query.limit {
            readings.truncate(limit);
        }
        Ok(readings)
    }

    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let mut deleted = 0;
        for series in tables.readings.values_mut() {
            let len = series.len();
            series.retain(|r| r.timestamp >= before);
            deleted += len - series.len();
        }
        Ok(deleted)
    }

    async fn insert_alert(&self, alert: &Alert) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.alerts.iter().any(|a| a.alert_id == alert.alert_id) {
            tables.alerts.push(alert.clone());
        }
        Ok(())
    }

    async fn acknowledge_alert(&self, alert_id: &str) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            Some(alert) if alert.status == AlertStatus::New => {
                alert.status = AlertStatus::Acknowledged;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let tables = self.tables.read().await;
        Ok(tables.alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn insert_dead_letter(&self, record: &DeadLetterRecord) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        if tables
            .dead_letters
            .iter()
            .any(|d| d.message_id == record.message_id)
        {
            return Ok(false);
        }
        tables.dead_letters.push(record.clone());
        Ok(true)
    }

    async fn dead_letter(&self, message_id: &str) -> StorageResult<Option<DeadLetterRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .dead_letters
            .iter()
            .find(|d| d.message_id == message_id)
            .cloned())
    }

    async fn recent_dead_letters(&self, limit: usize) -> StorageResult<Vec<DeadLetterRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables.aggregates.insert(
            (record.window_start, record.source_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn query_aggregates(
        &self,
        source_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<AggregateRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .aggregates
            .values()
            .filter(|a| a.source_id == source_id && a.window_start >= start && a.window_start < end)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables.read().await;
        let total: usize = tables.readings.values().map(VecDeque::len).sum();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_readings".to_string(), total.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let tables = self.tables.read().await;
        let total: usize = tables.readings.values().map(VecDeque::len).sum();
        Ok(format!(
            "In-Memory: {} readings across {} sources, {} alerts, {} dead letters, {} aggregates",
            total,
            tables.readings.len(),
            tables.alerts.len(),
            tables.dead_letters.len(),
            tables.aggregates.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
