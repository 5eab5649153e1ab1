//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Push deliveries are acked with 204 and nacked with 503
//! - The aggregate trigger returns the computed record
//! - Health reflects lost dead letters and breaker state
//! - Authentication middleware guards everything but health

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use plant_telemetry::{
    api::{ApiConfig, ApiState, spawn_api_server},
    pipeline::Pipeline,
    sinks::{Sink, TimeSeriesSink},
    storage::StorageBackend,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::helpers::*;

const TOKEN: &str = "test-token";

async fn spawn_test_api(pipeline: Pipeline) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };

    spawn_api_server(config, ApiState::new(pipeline))
        .await
        .unwrap()
}

fn push_body(message_id: &str, payload: &[u8], attempt: Option<u32>) -> Value {
    let mut body = json!({
        "message": {
            "messageId": message_id,
            "data": STANDARD.encode(payload),
        },
        "subscription": "projects/plant/subscriptions/ingest",
    });
    if let Some(attempt) = attempt {
        body["deliveryAttempt"] = json!(attempt);
    }
    body
}

async fn push(addr: SocketAddr, body: &Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/push"))
        .bearer_auth(TOKEN)
        .json(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_push_stores_reading_and_acks() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;

    let response = push(
        addr,
        &push_body("m-1", &reading_json("plant-1", "kiln_temp", 1520.0), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let alerts = store.recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].value, 1520.0);
}

#[tokio::test]
async fn test_push_retryable_failure_returns_503_until_last_attempt() {
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
    let addr = spawn_test_api(pipeline).await;
    let payload = reading_json("plant-1", "kiln_temp", 1400.0);

    let response = push(addr, &push_body("m-1", &payload, Some(1))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = push(addr, &push_body("m-1", &payload, Some(3))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let record = store.dead_letter("m-1").await.unwrap().unwrap();
    assert_eq!(record.delivery_attempts, 3);
}

#[tokio::test]
async fn test_push_with_invalid_base64_is_dead_lettered() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;

    let body = json!({ "message": { "message_id": "m-1", "data": "%%% not base64" } });
    let response = push(addr, &body).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let record = store.dead_letter("m-1").await.unwrap().unwrap();
    assert!(record.failure_reason.contains("base64"));
    assert_eq!(record.original_payload, b"%%% not base64".to_vec());
}

#[tokio::test]
async fn test_aggregate_endpoint_returns_record() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    let start: chrono::DateTime<chrono::Utc> = "2026-03-01T10:00:00Z".parse().unwrap();
    pipeline
        .processor
        .handle(&delivery(
            "m-1",
            reading_json_at(
                "plant-1",
                "units_produced",
                120.0,
                start + chrono::TimeDelta::minutes(10),
            ),
            1,
        ))
        .await;
    let addr = spawn_test_api(pipeline).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/aggregate"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "window_start": "2026-03-01T10:00:00Z",
            "window_end": "2026-03-01T12:00:00Z",
            "source_id": "plant-1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["source_id"], "plant-1");
    assert_eq!(json["production_rate"], 60.0);
    assert_eq!(json["quality_score"], 0.0);
}

#[tokio::test]
async fn test_aggregate_endpoint_rejects_inverted_window() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/aggregate"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "window_start": "2026-03-01T12:00:00Z",
            "window_end": "2026-03-01T10:00:00Z",
            "source_id": "plant-1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json: Value = response.json().await.unwrap();
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_health_is_open_and_reports_breakers() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    pipeline.breakers.get_or_create("alert_notifications");
    let addr = spawn_test_api(pipeline).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["dead_letter_persist_failures"], 0);
    assert_eq!(json["stores"].as_array().unwrap().len(), 1);
    assert_eq!(json["breakers"][0]["name"], "alert_notifications");
    assert_eq!(json["breakers"][0]["state"], "CLOSED");
}

#[tokio::test]
async fn test_health_unhealthy_after_lost_dead_letter() {
    let pipeline = pipeline_over(
        &test_config(),
        Arc::new(DegradedBackend::dead_letters_down()),
    );
    let addr = spawn_test_api(pipeline).await;

    let response = push(addr, &push_body("m-1", b"garbage", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["dead_letter_persist_failures"], 1);
}

#[tokio::test]
async fn test_stats_counts_deliveries() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;

    push(
        addr,
        &push_body("m-1", &reading_json("plant-1", "kiln_temp", 1400.0), None),
    )
    .await;
    push(addr, &push_body("m-2", b"{}", None)).await;

    let json: Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/stats"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(json["pipeline"]["received"], 2);
    assert_eq!(json["pipeline"]["acked"], 2);
    assert_eq!(json["pipeline"]["dead_lettered"], 1);
    assert!(json["storage"].as_str().unwrap().starts_with("In-Memory"));
}

#[tokio::test]
async fn test_dead_letter_endpoints() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;
    push(addr, &push_body("m-bad", b"[1, 2]", Some(2))).await;

    let client = reqwest::Client::new();
    let json: Value = client
        .get(format!("http://{addr}/api/v1/dead-letters?limit=10"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["dead_letters"][0]["message_id"], "m-bad");
    assert_eq!(json["dead_letters"][0]["delivery_attempts"], 2);
    assert_eq!(
        json["dead_letters"][0]["original_payload"],
        STANDARD.encode(b"[1, 2]")
    );

    let response = client
        .get(format!("http://{addr}/api/v1/dead-letters/m-bad"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("http://{addr}/api/v1/dead-letters/unknown"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alert_acknowledge_endpoint() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;
    push(
        addr,
        &push_body("m-1", &reading_json("plant-1", "mill_vibration", 12.0), None),
    )
    .await;

    let client = reqwest::Client::new();
    let json: Value = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["alerts"][0]["status"], "NEW");
    assert_eq!(json["alerts"][0]["severity"], "WARNING");
    let alert_id = json["alerts"][0]["alert_id"].as_str().unwrap().to_string();

    let ack = format!("http://{addr}/api/v1/alerts/{alert_id}/acknowledge");
    let response = client.post(&ack).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // only NEW alerts can be acknowledged
    let response = client.post(&ack).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let alerts = store.recent_alerts(10).await.unwrap();
    assert_eq!(alerts[0].status, plant_telemetry::AlertStatus::Acknowledged);
}

#[tokio::test]
async fn test_auth_required() {
    let (pipeline, _store) = memory_pipeline(&test_config());
    let addr = spawn_test_api(pipeline).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .header("Authorization", "Token test-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(format!("http://{addr}/api/v1/push"))
        .bearer_auth("wrong-token")
        .json(&push_body("m-1", b"{}", None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
