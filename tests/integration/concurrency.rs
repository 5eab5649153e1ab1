//! Concurrency tests for the dispatcher and the shared pipeline state
//!
//! These tests verify that:
//! - The dispatcher never exceeds its in-flight limit
//! - Concurrent handler invocations do not interfere with each other
//! - Duplicate deliveries racing each other leave one stored reading
//! - Breaker identity is shared across tasks

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use plant_telemetry::{
    SensorReading,
    actors::DispatcherHandle,
    breaker::BreakerRegistry,
    broker::MemoryBroker,
    config::BreakerConfig,
    error::SinkError,
    processor::Outcome,
    sinks::{Sink, TimeSeriesSink},
    storage::{QueryRange, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

/// Records the highest number of overlapping writes
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Sink for ConcurrencyGauge {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn write(&self, _reading: &SensorReading) -> Result<(), SinkError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatcher_respects_in_flight_limit() {
    let config = test_config();
    let gauge = Arc::new(ConcurrencyGauge::default());
    let gauge_sink = Arc::clone(&gauge);
    let (pipeline, store) = pipeline_with_sinks(&config, move |store| {
        vec![
            Arc::new(TimeSeriesSink::new(Arc::clone(store))) as Arc<dyn Sink>,
            gauge_sink,
        ]
    });

    let broker = Arc::new(MemoryBroker::new(Duration::from_secs(30)));
    let base = Utc::now();
    for i in 0..24 {
        broker.publish(reading_json_at(
            "plant-1",
            "kiln_temp",
            1400.0,
            base + TimeDelta::milliseconds(i),
        ));
    }

    let dispatcher = DispatcherHandle::spawn(broker.clone(), Arc::clone(&pipeline.processor), 4);
    tokio::time::timeout(Duration::from_secs(10), broker.wait_drained())
        .await
        .unwrap();
    let stats = dispatcher.shutdown().await.unwrap();

    assert_eq!(stats.acked, 24);
    assert_eq!(stats.nacked, 0);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 4);
    assert!(gauge.peak.load(Ordering::SeqCst) > 1);

    let series = store
        .query_range(QueryRange::window(
            "plant-1",
            base - TimeDelta::seconds(1),
            base + TimeDelta::seconds(1),
        ))
        .await
        .unwrap();
    assert_eq!(series.len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_handlers_keep_readings_apart() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let base = Utc::now();

    let deliveries: Vec<_> = (0..50)
        .map(|i| {
            let value = if i % 5 == 0 { 1600.0 } else { 1400.0 };
            delivery(
                &format!("m-{i}"),
                reading_json_at(
                    &format!("plant-{}", i % 2),
                    "kiln_temp",
                    value,
                    base + TimeDelta::milliseconds(i),
                ),
                1,
            )
        })
        .collect();

    let outcomes = join_all(
        deliveries
            .iter()
            .map(|delivery| pipeline.processor.handle(delivery)),
    )
    .await;

    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(outcome, Outcome::Stored { .. }))
    );
    assert_eq!(store.recent_alerts(100).await.unwrap().len(), 10);

    let stats = pipeline.health.stats();
    assert_eq!(stats.received, 50);
    assert_eq!(stats.acked, 50);
    assert_eq!(stats.alerts_emitted, 10);

    for source in ["plant-0", "plant-1"] {
        let series = store
            .query_range(QueryRange::window(
                source,
                base - TimeDelta::seconds(1),
                base + TimeDelta::seconds(1),
            ))
            .await
            .unwrap();
        assert_eq!(series.len(), 25);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicate_deliveries_store_once() {
    let (pipeline, store) = memory_pipeline(&test_config());
    let payload = reading_json("plant-1", "kiln_temp", 1400.0);

    let first = delivery("m-1", payload.clone(), 1);
    let second = delivery("m-1", payload, 2);
    let (a, b) = tokio::join!(
        pipeline.processor.handle(&first),
        pipeline.processor.handle(&second)
    );

    assert_eq!(a, Outcome::Stored { alert_id: None });
    assert_eq!(b, Outcome::Stored { alert_id: None });

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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_breaker_registry_hands_out_one_breaker_per_dependency() {
    let registry = Arc::new(BreakerRegistry::new(BreakerConfig::default()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("warehouse") })
        })
        .collect();

    let breakers: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
    assert_eq!(registry.reports().len(), 1);
}
