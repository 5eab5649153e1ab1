//! Failure tests for the pipeline's external dependencies
//!
//! These tests verify that the system degrades gracefully:
//! - Unreachable notification targets are cut off by the circuit breaker
//! - Dead-letter store outages turn the process unhealthy
//! - Alert store outages are retried like sink failures
//! - Redelivered dead letters are recorded once

use std::sync::Arc;

use assert_matches::assert_matches;
use plant_telemetry::{
    breaker::CircuitState,
    config::{Config, NotificationTarget, Webhook},
    pipeline::{ALERT_NOTIFICATIONS, OPS_NOTIFICATIONS},
    processor::{Disposition, Outcome},
    storage::StorageBackend,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn webhook(server: &MockServer, route: &str) -> Option<NotificationTarget> {
    Some(NotificationTarget::Webhook(Webhook {
        url: format!("{}{route}", server.uri()),
    }))
}

fn config_with_notifications(server: &MockServer, failure_threshold: u32) -> Config {
    let mut config = test_config();
    config.notifications.alerts = webhook(server, "/alerts");
    config.notifications.operations = webhook(server, "/ops");
    config.breaker.failure_threshold = failure_threshold;
    config
}

#[tokio::test]
async fn test_alert_notification_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(json!({
            "kind": "alert",
            "source_id": "plant-1",
            "alert": { "severity": "CRITICAL", "sensor_id": "kiln_temp" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, _store) = memory_pipeline(&config_with_notifications(&server, 5));
    pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1550.0), 1))
        .await;
}

#[tokio::test]
async fn test_failing_notification_target_opens_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (pipeline, store) = memory_pipeline(&config_with_notifications(&server, 2));

    for i in 0..4 {
        let outcome = pipeline
            .processor
            .handle(&delivery(
                &format!("m-{i}"),
                reading_json("plant-1", "kiln_temp", 1550.0 + i as f64),
                1,
            ))
            .await;
        // notification trouble never blocks the pipeline
        assert_matches!(outcome, Outcome::Stored { alert_id: Some(_) });
    }

    assert_eq!(store.recent_alerts(10).await.unwrap().len(), 4);

    let breaker = pipeline.breakers.get_or_create(ALERT_NOTIFICATIONS);
    assert_eq!(breaker.state(), CircuitState::Open);

    let reports = pipeline.breakers.reports();
    let report = reports
        .iter()
        .find(|r| r.name == ALERT_NOTIFICATIONS)
        .unwrap();
    assert_eq!(report.consecutive_failures, 2);
}

#[tokio::test]
async fn test_dead_letter_sends_operational_notice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ops"))
        .and(body_partial_json(json!({
            "kind": "operational",
            "title": "Message dead-lettered"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, store) = memory_pipeline(&config_with_notifications(&server, 5));
    pipeline
        .processor
        .handle(&delivery("m-bad", b"{not json".to_vec(), 1))
        .await;

    assert!(store.dead_letter("m-bad").await.unwrap().is_some());
    assert_eq!(
        pipeline.breakers.get_or_create(OPS_NOTIFICATIONS).state(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_lost_dead_letter_marks_process_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ops"))
        .and(body_partial_json(json!({ "title": "Dead letter lost" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Arc::new(DegradedBackend::dead_letters_down());
    let pipeline = pipeline_over(&config_with_notifications(&server, 5), backend);

    let outcome = pipeline
        .processor
        .handle(&delivery("m-bad", b"[]".to_vec(), 1))
        .await;

    // the message is still acked; redelivering it cannot help
    assert_eq!(outcome.disposition(), Disposition::Ack);
    assert!(!pipeline.health.is_healthy());

    let stats = pipeline.health.stats();
    assert_eq!(stats.dead_letter_persist_failures, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn test_alert_store_outage_requests_redelivery() {
    let backend = Arc::new(DegradedBackend::alerts_down());
    let pipeline = pipeline_over(&test_config(), backend.clone());

    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1600.0), 1))
        .await;
    assert_matches!(outcome, Outcome::Redeliver { ref reason } if reason.contains("alert persistence failed"));

    // on the last attempt the message is set aside instead
    let outcome = pipeline
        .processor
        .handle(&delivery("m-1", reading_json("plant-1", "kiln_temp", 1600.0), 3))
        .await;
    assert_matches!(outcome, Outcome::DeadLettered { alert_id: None, .. });

    let record = backend.dead_letter("m-1").await.unwrap().unwrap();
    assert_eq!(record.delivery_attempts, 3);
}

#[tokio::test]
async fn test_redelivered_invalid_message_recorded_once() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let payload = reading_json("plant-1", "", 1.0);

    for attempt in 1..=2 {
        let outcome = pipeline
            .processor
            .handle(&delivery("m-dup", payload.clone(), attempt))
            .await;
        assert_matches!(outcome, Outcome::Invalid { .. });
    }

    let records = store.recent_dead_letters(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delivery_attempts, 1);
    assert_eq!(pipeline.health.stats().dead_lettered, 1);
}
