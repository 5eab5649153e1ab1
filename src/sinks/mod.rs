//! Durable sinks for validated readings
//!
//! A [`Sink`] accepts one reading and reports `Ok` or a classified
//! [`SinkError`]. The [`fanout::FanoutWriter`] writes every reading to all
//! configured sinks at once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::SensorReading;
use crate::error::SinkError;
use crate::storage::StorageBackend;

pub mod fanout;

pub use fanout::{FanoutWriter, PartialResult, SinkOutcome};

#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable name used in logs and per-sink outcomes
    fn name(&self) -> &str;

    async fn write(&self, reading: &SensorReading) -> Result<(), SinkError>;
}

/// Appends every reading to the time-series table of a backend
pub struct TimeSeriesSink {
    backend: Arc<dyn StorageBackend>,
}

impl TimeSeriesSink {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Sink for TimeSeriesSink {
    fn name(&self) -> &str {
        "time_series"
    }

    async fn write(&self, reading: &SensorReading) -> Result<(), SinkError> {
        self.backend.insert_reading(reading).await?;
        Ok(())
    }
}

/// Keeps the most recent value of every `(source_id, sensor_id)`
pub struct LatestValueSink {
    backend: Arc<dyn StorageBackend>,
}

impl LatestValueSink {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Sink for LatestValueSink {
    fn name(&self) -> &str {
        "latest_value"
    }

    async fn write(&self, reading: &SensorReading) -> Result<(), SinkError> {
        self.backend.upsert_latest(reading).await?;
        Ok(())
    }
}
