//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Concurrent handler invocations share a pool
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::{AggregateRecord, Alert, AlertStatus, DeadLetterRecord, SensorReading, Severity};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode
    ///
    /// ```no_run
    /// # use plant_telemetry::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./telemetry.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::SerializationError(format!("timestamp out of range: {millis}"))
        })
    }

    fn reading_from_row(row: &SqliteRow) -> StorageResult<SensorReading> {
        Ok(SensorReading {
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            source_id: row.try_get("source_id")?,
            sensor_id: row.try_get("sensor_id")?,
            value: row.try_get("value")?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;
        Ok(Alert {
            alert_id: row.try_get("alert_id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            severity: severity
                .parse::<Severity>()
                .map_err(StorageError::SerializationError)?,
            source_id: row.try_get("source_id")?,
            sensor_id: row.try_get("sensor_id")?,
            value: row.try_get("value")?,
            message: row.try_get("message")?,
            status: status
                .parse::<AlertStatus>()
                .map_err(StorageError::SerializationError)?,
        })
    }

    fn dead_letter_from_row(row: &SqliteRow) -> StorageResult<DeadLetterRecord> {
        let attempts: i64 = row.try_get("delivery_attempts")?;
        Ok(DeadLetterRecord {
            message_id: row.try_get("message_id")?,
            original_payload: row.try_get("original_payload")?,
            failure_reason: row.try_get("failure_reason")?,
            delivery_attempts: u32::try_from(attempts).map_err(|_| {
                StorageError::SerializationError(format!("invalid attempt count: {attempts}"))
            })?,
            recorded_at: Self::millis_to_timestamp(row.try_get("recorded_at")?)?,
        })
    }

    fn aggregate_from_row(row: &SqliteRow) -> StorageResult<AggregateRecord> {
        Ok(AggregateRecord {
            window_start: Self::millis_to_timestamp(row.try_get("window_start")?)?,
            window_end: Self::millis_to_timestamp(row.try_get("window_end")?)?,
            source_id: row.try_get("source_id")?,
            production_rate: row.try_get("production_rate")?,
            energy_per_unit: row.try_get("energy_per_unit")?,
            quality_score: row.try_get("quality_score")?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip_all, fields(source_id = %reading.source_id, sensor_id = %reading.sensor_id))]
    async fn insert_reading(&self, reading: &SensorReading) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO readings (source_id, sensor_id, timestamp, value)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (source_id, sensor_id, timestamp) DO NOTHING
            "#,
        )
        .bind(&reading.source_id)
        .bind(&reading.sensor_id)
        .bind(Self::timestamp_to_millis(&reading.timestamp))
        .bind(reading.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(source_id = %reading.source_id, sensor_id = %reading.sensor_id))]
    async fn upsert_latest(&self, reading: &SensorReading) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO latest_values (source_id, sensor_id, timestamp, value)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (source_id, sensor_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                value = excluded.value
            WHERE excluded.timestamp >= latest_values.timestamp
            "#,
        )
        .bind(&reading.source_id)
        .bind(&reading.sensor_id)
        .bind(Self::timestamp_to_millis(&reading.timestamp))
        .bind(reading.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_value(
        &self,
        source_id: &str,
        sensor_id: &str,
    ) -> StorageResult<Option<SensorReading>> {
        let row = sqlx::query(
            r#"
            SELECT source_id, sensor_id, timestamp, value
            FROM latest_values
            WHERE source_id = ? AND sensor_id = ?
            "#,
        )
        .bind(source_id)
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::reading_from_row).transpose()
    }

    #[instrument(skip(self), fields(source_id = %query.source_id))]
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SensorReading>> {
        debug!(
            "querying readings for {} from {} to {}",
            query.source_id, query.start, query.end
        );

        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT source_id, sensor_id, timestamp, value
            FROM readings
            WHERE source_id = ?
              AND (? IS NULL OR sensor_id = ?)
              AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC, sensor_id ASC
            LIMIT ?
            "#,
        )
        .bind(&query.source_id)
        .bind(query.sensor_id.as_deref())
        .bind(query.sensor_id.as_deref())
        .bind(Self::timestamp_to_millis(&query.start))
        .bind(Self::timestamp_to_millis(&query.end))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .iter()
            .map(Self::reading_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("query returned {} readings", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM readings WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old readings", deleted);
        Ok(deleted)
    }

    #[instrument(skip_all, fields(alert_id = %alert.alert_id))]
    async fn insert_alert(&self, alert: &Alert) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, timestamp, severity, source_id, sensor_id, value, message, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (alert_id) DO NOTHING
            "#,
        )
        .bind(&alert.alert_id)
        .bind(Self::timestamp_to_millis(&alert.timestamp))
        .bind(alert.severity.as_str())
        .bind(&alert.source_id)
        .bind(&alert.sensor_id)
        .bind(alert.value)
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn acknowledge_alert(&self, alert_id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE alerts SET status = 'ACKNOWLEDGED' WHERE alert_id = ? AND status = 'NEW'",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT alert_id, timestamp, severity, source_id, sensor_id, value, message, status
            FROM alerts
            ORDER BY rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip_all, fields(message_id = %record.message_id))]
    async fn insert_dead_letter(&self, record: &DeadLetterRecord) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dead_letters (
                message_id, original_payload, failure_reason, delivery_attempts, recorded_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.original_payload)
        .bind(&record.failure_reason)
        .bind(i64::from(record.delivery_attempts))
        .bind(Self::timestamp_to_millis(&record.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn dead_letter(&self, message_id: &str) -> StorageResult<Option<DeadLetterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, original_payload, failure_reason, delivery_attempts, recorded_at
            FROM dead_letters
            WHERE message_id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::dead_letter_from_row).transpose()
    }

    async fn recent_dead_letters(&self, limit: usize) -> StorageResult<Vec<DeadLetterRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, original_payload, failure_reason, delivery_attempts, recorded_at
            FROM dead_letters
            ORDER BY recorded_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::dead_letter_from_row).collect()
    }

    #[instrument(skip_all, fields(source_id = %record.source_id, window_start = %record.window_start))]
    async fn upsert_aggregate(&self, record: &AggregateRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregates (
                window_start, window_end, source_id,
                production_rate, energy_per_unit, quality_score
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (window_start, source_id) DO UPDATE SET
                window_end = excluded.window_end,
                production_rate = excluded.production_rate,
                energy_per_unit = excluded.energy_per_unit,
                quality_score = excluded.quality_score
            "#,
        )
        .bind(Self::timestamp_to_millis(&record.window_start))
        .bind(Self::timestamp_to_millis(&record.window_end))
        .bind(&record.source_id)
        .bind(record.production_rate)
        .bind(record.energy_per_unit)
        .bind(record.quality_score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_aggregates(
        &self,
        source_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<AggregateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT window_start, window_end, source_id,
                   production_rate, energy_per_unit, quality_score
            FROM aggregates
            WHERE source_id = ? AND window_start >= ? AND window_start < ?
            ORDER BY window_start ASC
            "#,
        )
        .bind(source_id)
        .bind(Self::timestamp_to_millis(&start))
        .bind(Self::timestamp_to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::aggregate_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (readings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        let (alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        let (dead_letters,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} readings, {} alerts, {} dead letters, {:.2} MB on disk",
            readings, alerts, dead_letters, file_size_mb
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
