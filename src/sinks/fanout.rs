//! Concurrent write of one reading to several independent sinks
//!
//! ```text
//!                  ┌──► time_series  (timeout) ──► Ok | Err
//! reading ──fan──► ├──► latest_value (timeout) ──► Ok | Err
//!                  └──► ...
//!                             │
//!                             ▼
//!                       PartialResult
//! ```
//!
//! The write as a whole never fails: a slow or broken sink only affects its
//! own entry in the [`PartialResult`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use super::Sink;
use crate::SensorReading;
use crate::error::SinkError;

/// Result of writing to one sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkOutcome {
    pub sink: String,
    pub result: Result<(), SinkError>,
}

/// Per-sink outcomes of one fan-out write, in sink configuration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialResult {
    pub outcomes: Vec<SinkOutcome>,
}

impl PartialResult {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn any_ok(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SinkError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.sink.as_str(), e)))
    }

    pub fn has_non_retryable(&self) -> bool {
        self.failures().any(|(_, e)| !e.retryable)
    }

    pub fn outcome(&self, sink: &str) -> Option<&Result<(), SinkError>> {
        self.outcomes
            .iter()
            .find(|o| o.sink == sink)
            .map(|o| &o.result)
    }

    /// One line naming every failed sink, for logs and dead-letter reasons
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|(sink, err)| format!("{sink}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Writes each reading to every configured sink concurrently
#[derive(Clone)]
pub struct FanoutWriter {
    sinks: Vec<Arc<dyn Sink>>,
    timeout: Duration,
}

impl FanoutWriter {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, timeout: Duration) -> Self {
        Self { sinks, timeout }
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    #[instrument(skip_all, fields(source_id = %reading.source_id, sensor_id = %reading.sensor_id))]
    pub async fn write(&self, reading: &SensorReading) -> PartialResult {
        let writes = self.sinks.iter().map(|sink| {
            let sink = Arc::clone(sink);
            async move {
                let result = match tokio::time::timeout(self.timeout, sink.write(reading)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::timeout(self.timeout)),
                };

                if let Err(e) = &result {
                    warn!("sink {} failed: {e}", sink.name());
                }

                SinkOutcome {
                    sink: sink.name().to_string(),
                    result,
                }
            }
        });

        let outcomes = join_all(writes).await;
        debug!(
            "fan-out complete: {}/{} sinks ok",
            outcomes.iter().filter(|o| o.result.is_ok()).count(),
            outcomes.len()
        );

        PartialResult { outcomes }
    }
}
