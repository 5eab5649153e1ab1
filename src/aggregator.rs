//! Windowed roll-up of raw readings into [`AggregateRecord`]s
//!
//! The aggregate of `(window_start, source_id)` is upserted, so re-running a
//! window over unchanged data replaces the row with an identical one.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::{debug, info, instrument};

use crate::config::AggregationConfig;
use crate::storage::{QueryRange, StorageBackend, StorageError};
use crate::{AggregateRecord, SensorReading};

#[derive(Debug)]
pub enum AggregateError {
    /// `window_end` is not after `window_start`
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Storage(StorageError),
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateError::InvalidWindow { start, end } => write!(
                f,
                "invalid aggregation window: end {} is not after start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            ),
            AggregateError::Storage(err) => write!(f, "aggregation storage error: {err}"),
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregateError::Storage(err) => Some(err),
            AggregateError::InvalidWindow { .. } => None,
        }
    }
}

impl From<StorageError> for AggregateError {
    fn from(err: StorageError) -> Self {
        AggregateError::Storage(err)
    }
}

/// The three figures of an aggregate, computed from one window of readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Figures {
    pub production_rate: f64,
    pub energy_per_unit: f64,
    pub quality_score: f64,
}

/// Domain formulas turning a window of readings into [`Figures`]
pub trait AggregationFormulas: Send + Sync {
    /// `readings` are all readings of one source within the window, oldest first
    fn compute(&self, readings: &[SensorReading], window: TimeDelta) -> Figures;
}

/// Plant formulas over three configured sensors
///
/// - `production_rate`: units produced per hour of window
/// - `energy_per_unit`: energy consumed divided by units produced, 0 without production
/// - `quality_score`: mean of the quality readings, 0 without any
#[derive(Debug, Clone)]
pub struct DefaultFormulas {
    production_sensor: String,
    energy_sensor: String,
    quality_sensor: String,
}

impl DefaultFormulas {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            production_sensor: config.production_sensor.clone(),
            energy_sensor: config.energy_sensor.clone(),
            quality_sensor: config.quality_sensor.clone(),
        }
    }
}

impl Default for DefaultFormulas {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl AggregationFormulas for DefaultFormulas {
    fn compute(&self, readings: &[SensorReading], window: TimeDelta) -> Figures {
        let sum_of = |sensor: &str| -> f64 {
            readings
                .iter()
                .filter(|r| r.sensor_id == sensor)
                .map(|r| r.value)
                .sum()
        };

        let units = sum_of(&self.production_sensor);
        let energy = sum_of(&self.energy_sensor);

        let hours = window.num_milliseconds() as f64 / 3_600_000.0;
        let production_rate = if hours > 0.0 { units / hours } else { 0.0 };
        let energy_per_unit = if units > 0.0 { energy / units } else { 0.0 };

        let quality: Vec<f64> = readings
            .iter()
            .filter(|r| r.sensor_id == self.quality_sensor)
            .map(|r| r.value)
            .collect();
        let quality_score = if quality.is_empty() {
            0.0
        } else {
            quality.iter().sum::<f64>() / quality.len() as f64
        };

        Figures {
            production_rate,
            energy_per_unit,
            quality_score,
        }
    }
}

#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn StorageBackend>,
    formulas: Arc<dyn AggregationFormulas>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn StorageBackend>, formulas: Arc<dyn AggregationFormulas>) -> Self {
        Self { store, formulas }
    }

    #[instrument(skip(self), fields(window_start = %window_start, window_end = %window_end))]
    pub async fn aggregate(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        source_id: &str,
    ) -> Result<AggregateRecord, AggregateError> {
        if window_end <= window_start {
            return Err(AggregateError::InvalidWindow {
                start: window_start,
                end: window_end,
            });
        }

        let readings = self
            .store
            .query_range(QueryRange::window(source_id, window_start, window_end))
            .await?;
        debug!("aggregating {} readings", readings.len());

        let figures = self
            .formulas
            .compute(&readings, window_end - window_start);

        let record = AggregateRecord {
            window_start,
            window_end,
            source_id: source_id.to_string(),
            production_rate: figures.production_rate,
            energy_per_unit: figures.energy_per_unit,
            quality_score: figures.quality_score,
        };
        self.store.upsert_aggregate(&record).await?;

        info!(
            "aggregate for {source_id}: {:.2} units/h, {:.3} kWh/unit, quality {:.3}",
            record.production_rate, record.energy_per_unit, record.quality_score
        );
        Ok(record)
    }
}

/// Last window of length `window` that ended at or before `now`, aligned to the epoch
pub fn last_complete_window(
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let end = now.duration_trunc(window).ok()?;
    Some((end - window, end))
}
