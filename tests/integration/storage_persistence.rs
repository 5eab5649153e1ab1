//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Readings, alerts and dead letters survive a restart
//! - Aggregates are computed from persisted readings and upserted
//! - Retention cleanup removes old readings

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use plant_telemetry::{
    AlertStatus,
    actors::RetentionHandle,
    config::{Config, StorageConfig},
    pipeline::Pipeline,
    processor::Outcome,
    storage::{QueryRange, StorageBackend, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

fn sqlite_config(path: &Path) -> Config {
    let mut config = test_config();
    config.storage = Some(StorageConfig::Sqlite {
        path: path.to_path_buf(),
        retention_days: 30,
    });
    config
}

fn hour_start() -> DateTime<Utc> {
    "2026-03-01T10:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn test_pipeline_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("telemetry.db");
    let config = sqlite_config(&db_path);

    let alert_id = {
        let pipeline = Pipeline::from_config(&config).await.unwrap();
        let outcome = pipeline
            .processor
            .handle(&delivery(
                "m-hot",
                reading_json_at("plant-1", "kiln_temp", 1530.0, hour_start()),
                1,
            ))
            .await;
        pipeline
            .processor
            .handle(&delivery("m-bad", b"{\"value\":".to_vec(), 1))
            .await;
        pipeline.store.close().await.unwrap();
        outcome.alert_id().unwrap().to_string()
    };

    let pipeline = Pipeline::from_config(&config).await.unwrap();

    let alerts = pipeline.store.recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_id, alert_id);
    assert_eq!(alerts[0].status, AlertStatus::New);

    let latest = pipeline
        .latest_store
        .latest_value("plant-1", "kiln_temp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.value, 1530.0);
    assert_eq!(latest.timestamp, hour_start());

    let dead = pipeline.store.dead_letter("m-bad").await.unwrap().unwrap();
    assert_eq!(dead.original_payload, b"{\"value\":".to_vec());
    assert!(dead.failure_reason.contains("malformed JSON"));

    assert!(pipeline.store.acknowledge_alert(&alert_id).await.unwrap());
    assert!(!pipeline.store.acknowledge_alert(&alert_id).await.unwrap());
}

#[tokio::test]
async fn test_redelivered_reading_is_stored_once() {
    let temp_dir = tempdir().unwrap();
    let pipeline = Pipeline::from_config(&sqlite_config(&temp_dir.path().join("t.db")))
        .await
        .unwrap();

    let payload = reading_json_at("plant-1", "kiln_temp", 1400.0, hour_start());
    for attempt in 1..=3 {
        let outcome = pipeline
            .processor
            .handle(&delivery("m-1", payload.clone(), attempt))
            .await;
        assert_eq!(outcome, Outcome::Stored { alert_id: None });
    }

    let series = pipeline
        .store
        .query_range(QueryRange::window(
            "plant-1",
            hour_start(),
            hour_start() + TimeDelta::hours(1),
        ))
        .await
        .unwrap();
    assert_eq!(series.len(), 1);
}

#[tokio::test]
async fn test_aggregate_over_persisted_readings() {
    let temp_dir = tempdir().unwrap();
    let pipeline = Pipeline::from_config(&sqlite_config(&temp_dir.path().join("t.db")))
        .await
        .unwrap();

    let start = hour_start();
    let samples = [
        ("units_produced", 40.0, 5),
        ("units_produced", 60.0, 35),
        ("energy_kwh", 250.0, 10),
        ("quality_index", 0.9, 15),
        ("quality_index", 0.7, 45),
        // outside the window
        ("units_produced", 999.0, 65),
    ];
    for (i, (sensor, value, minute)) in samples.iter().enumerate() {
        let outcome = pipeline
            .processor
            .handle(&delivery(
                &format!("m-{i}"),
                reading_json_at("plant-1", sensor, *value, start + TimeDelta::minutes(*minute)),
                1,
            ))
            .await;
        assert_eq!(outcome, Outcome::Stored { alert_id: None });
    }

    let end = start + TimeDelta::hours(1);
    let record = pipeline
        .aggregator
        .aggregate(start, end, "plant-1")
        .await
        .unwrap();

    assert_eq!(record.production_rate, 100.0);
    assert_eq!(record.energy_per_unit, 2.5);
    assert!((record.quality_score - 0.8).abs() < 1e-9);

    // running the same window again overwrites instead of duplicating
    pipeline
        .aggregator
        .aggregate(start, end, "plant-1")
        .await
        .unwrap();
    let stored = pipeline
        .store
        .query_aggregates("plant-1", start, end)
        .await
        .unwrap();
    assert_eq!(stored, vec![record]);
}

#[tokio::test]
async fn test_close_releases_separate_latest_value_store() {
    let temp_dir = tempdir().unwrap();
    let mut config = sqlite_config(&temp_dir.path().join("series.db"));
    config.latest_value_storage = Some(StorageConfig::Sqlite {
        path: temp_dir.path().join("latest.db"),
        retention_days: 30,
    });
    let pipeline = Pipeline::from_config(&config).await.unwrap();
    assert!(!Arc::ptr_eq(&pipeline.store, &pipeline.latest_store));

    pipeline.close().await.unwrap();

    assert!(pipeline.store.recent_alerts(1).await.is_err());
    assert!(
        pipeline
            .latest_store
            .latest_value("plant-1", "kiln_temp")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_close_shared_store_once() {
    let temp_dir = tempdir().unwrap();
    let pipeline = Pipeline::from_config(&sqlite_config(&temp_dir.path().join("t.db")))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&pipeline.store, &pipeline.latest_store));

    pipeline.close().await.unwrap();
    assert!(pipeline.store.recent_alerts(1).await.is_err());
}

#[tokio::test]
async fn test_retention_cleanup() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("retention.db"))
        .await
        .unwrap();
    let store: Arc<dyn StorageBackend> = Arc::new(backend);

    let now = Utc::now();
    for (i, age_days) in [1, 10, 40, 90].iter().enumerate() {
        store
            .insert_reading(&plant_telemetry::SensorReading {
                timestamp: now - TimeDelta::days(*age_days),
                source_id: "plant-1".to_string(),
                sensor_id: format!("sensor-{i}"),
                value: 1.0,
            })
            .await
            .unwrap();
    }

    let retention = RetentionHandle::spawn(Arc::clone(&store), 30);
    // the startup pass may already have run; either way nothing old is left
    retention.cleanup_now().await.unwrap();

    let remaining = store
        .query_range(QueryRange::window(
            "plant-1",
            now - TimeDelta::days(365),
            now + TimeDelta::days(1),
        ))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);

    retention.shutdown().await.unwrap();
}
