//! Strict schema check for inbound sensor readings
//!
//! The payload is parsed into a loose JSON object first so that every
//! rejection can name the offending field. A payload either produces a
//! complete [`SensorReading`] or a [`ValidationError`], never anything in
//! between.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::trace;

use crate::SensorReading;
use crate::config::Config;
use crate::error::ValidationError;

const REQUIRED_FIELDS: [&str; 4] = ["timestamp", "source_id", "sensor_id", "value"];

#[derive(Debug, Clone, Default)]
pub struct Validator {
    known_sensors: HashSet<String>,
}

impl Validator {
    pub fn new(known_sensors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            known_sensors: known_sensors.into_iter().map(Into::into).collect(),
        }
    }

    /// Every sensor with a threshold rule, the explicitly listed ones and
    /// the sensors the aggregator reads
    pub fn from_config(config: &Config) -> Self {
        let ruled = config.thresholds.iter().map(|rule| rule.sensor_id.clone());
        let listed = config.known_sensors.iter().cloned();
        let aggregation = &config.aggregation;
        let aggregated = [
            &aggregation.production_sensor,
            &aggregation.energy_sensor,
            &aggregation.quality_sensor,
        ]
        .into_iter()
        .cloned();
        Self::new(ruled.chain(listed).chain(aggregated))
    }

    pub fn is_known(&self, sensor_id: &str) -> bool {
        self.known_sensors.contains(sensor_id)
    }

    pub fn validate(&self, raw: &[u8]) -> Result<SensorReading, ValidationError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::new(format!("malformed JSON: {e}")))?;

        let Value::Object(object) = value else {
            return Err(ValidationError::new("payload is not a JSON object"));
        };

        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(ValidationError::new(format!(
                "missing required field '{missing}'"
            )));
        }

        let timestamp = string_field(&object, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| {
                ValidationError::new(format!("field 'timestamp' is not RFC3339: {e}"))
            })?
            .with_timezone(&Utc);

        let source_id = string_field(&object, "source_id")?;
        if source_id.is_empty() {
            return Err(ValidationError::new("field 'source_id' is empty"));
        }

        let sensor_id = string_field(&object, "sensor_id")?;
        if !self.is_known(sensor_id) {
            return Err(ValidationError::new(format!(
                "unknown sensor_id '{sensor_id}'"
            )));
        }

        let value = number_field(&object, "value")?;

        let reading = SensorReading {
            timestamp,
            source_id: source_id.to_string(),
            sensor_id: sensor_id.to_string(),
            value,
        };
        trace!("validated reading: {reading:?}");
        Ok(reading)
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str, ValidationError> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ValidationError::new(format!(
            "field '{field}' must be a string, got {}",
            json_type(other)
        ))),
        None => Err(ValidationError::new(format!(
            "missing required field '{field}'"
        ))),
    }
}

fn number_field(object: &Map<String, Value>, field: &str) -> Result<f64, ValidationError> {
    let value = match object.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            return Err(ValidationError::new(format!(
                "field '{field}' must be a number, got {} {other}",
                json_type(other)
            )));
        }
        None => {
            return Err(ValidationError::new(format!(
                "missing required field '{field}'"
            )));
        }
    };

    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::new(format!(
            "field '{field}' is not a finite number"
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
