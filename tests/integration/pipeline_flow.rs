//! End-to-end tests of the message pipeline
//!
//! These tests verify that:
//! - Valid readings reach every sink and alerts are recorded as NEW
//! - Invalid messages are dead-lettered on the first attempt
//! - Retryable failures are redelivered until the attempt limit
//! - Partial fan-out still evaluates thresholds

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeDelta, Utc};
use plant_telemetry::{
    AlertStatus, Severity,
    actors::DispatcherHandle,
    broker::MemoryBroker,
    processor::{Disposition, Outcome},
    sinks::{LatestValueSink, Sink, TimeSeriesSink},
    storage::{QueryRange, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_kiln_overheat_raises_critical_alert() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let mut alerts = pipeline.processor.publisher().subscribe();

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1520.0), 1))
        .await;

    assert_matches!(outcome, Outcome::Stored { alert_id: Some(_) });
    assert_eq!(outcome.disposition(), Disposition::Ack);

    let stored = store.recent_alerts(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].severity, Severity::Critical);
    assert_eq!(stored[0].status, AlertStatus::New);
    assert_eq!(stored[0].sensor_id, "kiln_temp");
    assert_eq!(stored[0].value, 1520.0);
    assert_eq!(Some(stored[0].alert_id.as_str()), outcome.alert_id());

    let message = alerts.try_recv().unwrap();
    assert_eq!(message.alert_id, stored[0].alert_id);
    assert_eq!(message.severity, Severity::Critical);

    let latest = store.latest_value("plant-1", "kiln_temp").await.unwrap();
    assert_eq!(latest.map(|r| r.value), Some(1520.0));
}

#[tokio::test]
async fn test_reading_within_bounds_is_stored_without_alert() {
    let (pipeline, store) = memory_pipeline(&test_config());

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1450.0), 1))
        .await;

    assert_eq!(outcome, Outcome::Stored { alert_id: None });
    assert!(store.recent_alerts(10).await.unwrap().is_empty());

    let now = Utc::now();
    let series = store
        .query_range(QueryRange::window(
            "plant-1",
            now - TimeDelta::minutes(1),
            now + TimeDelta::minutes(1),
        ))
        .await
        .unwrap();
    assert_eq!(series.len(), 1);
}

#[tokio::test]
async fn test_bound_value_is_a_violation() {
    let (pipeline, store) = memory_pipeline(&test_config());

    pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1500.0), 1))
        .await;
    pipeline
        .processor
        .handle(&delivery("m-2", reading_json("plant-1", "mill_vibration", 0.1), 1))
        .await;

    let stored = store.recent_alerts(10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|a| a.severity == Severity::Warning));
}

#[tokio::test]
async fn test_non_numeric_value_is_dead_lettered_without_retry() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let payload = br#"{"timestamp":"2026-03-01T10:00:00Z","source_id":"plant-1","sensor_id":"kiln_temp","value":"not-a-number"}"#.to_vec();

    let outcome = pipeline
        .processor
        .handle(&delivery("m-bad", payload.clone(), 1))
        .await;

    assert_matches!(outcome, Outcome::Invalid { ref reason } if reason.contains("value"));
    assert_eq!(outcome.disposition(), Disposition::Ack);

    let record = store.dead_letter("m-bad").await.unwrap().unwrap();
    assert_eq!(record.delivery_attempts, 1);
    assert_eq!(record.original_payload, payload);
    assert!(record.failure_reason.contains("value"));

    assert!(store.latest_value("plant-1", "kiln_temp").await.unwrap().is_none());
    assert_eq!(pipeline.health.stats().dead_lettered, 1);
}

#[tokio::test]
async fn test_unknown_sensor_is_dead_lettered() {
    let (pipeline, store) = memory_pipeline(&test_config());

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "mystery_sensor", 3.0), 1))
        .await;

    assert_matches!(outcome, Outcome::Invalid { .. });
    let record = store.dead_letter("m-1").await.unwrap().unwrap();
    assert!(record.failure_reason.contains("mystery_sensor"));
}

#[tokio::test]
async fn test_hanging_sink_is_retried_until_dead_lettered() {
    let config = test_config();
    let (pipeline, store) = pipeline_with_sinks(&config, |store| {
        vec![
            Arc::new(TimeSeriesSink::new(Arc::clone(store))) as Arc<dyn Sink>,
            Arc::new(HangingSink),
        ]
    });

    let broker = Arc::new(MemoryBroker::new(Duration::from_secs(30)));
    broker.publish_with_id("m-slow", reading_json("plant-1", "kiln_temp", 1400.0));

    let dispatcher = DispatcherHandle::spawn(broker.clone(), Arc::clone(&pipeline.processor), 4);
    tokio::time::timeout(Duration::from_secs(10), broker.wait_drained())
        .await
        .expect("broker should drain once the message is dead-lettered");
    let stats = dispatcher.shutdown().await.unwrap();

    assert_eq!(stats.pulled, 3);
    assert_eq!(stats.nacked, 2);
    assert_eq!(stats.acked, 1);

    let record = store.dead_letter("m-slow").await.unwrap().unwrap();
    assert_eq!(record.delivery_attempts, 3);
    assert!(
        record.failure_reason.contains("delivery attempts exhausted (3/3)"),
        "unexpected reason: {}",
        record.failure_reason
    );
    assert!(record.failure_reason.contains("hanging"));

    // repeated writes of the same reading are absorbed by the time series
    let now = Utc::now();
    let series = store
        .query_range(QueryRange::window(
            "plant-1",
            now - TimeDelta::minutes(1),
            now + TimeDelta::minutes(1),
        ))
        .await
        .unwrap();
    assert_eq!(series.len(), 1);
}

#[tokio::test]
async fn test_flaky_sink_recovers_on_redelivery() {
    let config = test_config();
    let flaky = Arc::new(FlakySink::new(1));
    let flaky_sink = Arc::clone(&flaky);
    let (pipeline, store) = pipeline_with_sinks(&config, move |store| {
        vec![
            Arc::new(TimeSeriesSink::new(Arc::clone(store))) as Arc<dyn Sink>,
            flaky_sink,
        ]
    });

    let broker = Arc::new(MemoryBroker::new(Duration::from_secs(30)));
    broker.publish(reading_json("plant-1", "kiln_temp", 1400.0));

    let dispatcher = DispatcherHandle::spawn(broker.clone(), Arc::clone(&pipeline.processor), 4);
    tokio::time::timeout(Duration::from_secs(10), broker.wait_drained())
        .await
        .unwrap();
    let stats = dispatcher.shutdown().await.unwrap();

    assert_eq!(flaky.calls(), 2);
    assert_eq!(stats.nacked, 1);
    assert_eq!(stats.acked, 1);
    assert!(store.recent_dead_letters(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_fanout_still_alerts_and_requests_redelivery() {
    let config = test_config();
    let (pipeline, store) = pipeline_with_sinks(&config, |store| {
        vec![
            Arc::new(TimeSeriesSink::new(Arc::clone(store))) as Arc<dyn Sink>,
            Arc::new(FailingSink {
                name: "latest_value",
                retryable: true,
            }),
        ]
    });

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1600.0), 1))
        .await;

    assert_matches!(
        &outcome,
        Outcome::Partial { partial, alert_id: Some(_), redeliver: true } => {
            assert!(partial.outcome("time_series").unwrap().is_ok());
            assert!(partial.outcome("latest_value").unwrap().is_err());
        }
    );
    assert_eq!(outcome.disposition(), Disposition::Nack);
    assert_eq!(store.recent_alerts(10).await.unwrap().len(), 1);
    assert_eq!(pipeline.health.stats().redelivery_requested, 1);
}

#[tokio::test]
async fn test_non_retryable_sink_failure_dead_letters_after_detection() {
    let config = test_config();
    let (pipeline, store) = pipeline_with_sinks(&config, |store| {
        vec![
            Arc::new(LatestValueSink::new(Arc::clone(store))) as Arc<dyn Sink>,
            Arc::new(FailingSink {
                name: "time_series",
                retryable: false,
            }),
        ]
    });

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1600.0), 1))
        .await;

    assert_matches!(outcome, Outcome::DeadLettered { alert_id: Some(_), .. });
    assert_eq!(outcome.disposition(), Disposition::Ack);

    let record = store.dead_letter("m-1").await.unwrap().unwrap();
    assert!(record.failure_reason.starts_with("non-retryable sink failure"));
    assert_eq!(store.recent_alerts(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_every_sink_failing_defers_detection() {
    let config = test_config();
    let (pipeline, store) = pipeline_with_sinks(&config, |_| {
        vec![Arc::new(FailingSink {
            name: "time_series",
            retryable: true,
        }) as Arc<dyn Sink>]
    });

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1600.0), 1))
        .await;

    assert_matches!(outcome, Outcome::Redeliver { .. });
    assert!(store.recent_alerts(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_order_reading_keeps_newer_latest_value() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let now = Utc::now();

    pipeline
        .processor
        .handle(&delivery(
            "m-new",
            reading_json_at("plant-1", "kiln_temp", 1410.0, now),
            1,
        ))
        .await;
    pipeline
        .processor
        .handle(&delivery(
            "m-old",
            reading_json_at("plant-1", "kiln_temp", 1390.0, now - TimeDelta::seconds(30)),
            1,
        ))
        .await;

    let latest = store
        .latest_value("plant-1", "kiln_temp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.value, 1410.0);
}
