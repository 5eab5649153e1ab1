pub mod actors;
pub mod aggregator;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod breaker;
pub mod broker;
pub mod config;
pub mod deadletter;
pub mod detector;
pub mod discord;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod sinks;
pub mod storage;
pub mod util;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One value reported by one sensor of one source (plant, line, kiln, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub sensor_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    New,
    Acknowledged,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "NEW",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(AlertStatus::New),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// A threshold violation detected on a single reading.
///
/// Everything except `status` is fixed at creation. `status` moves from
/// `New` to `Acknowledged` once, through [`storage::StorageBackend::acknowledge_alert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source_id: String,
    pub sensor_id: String,
    pub value: f64,
    pub message: String,
    pub status: AlertStatus,
}

impl Alert {
    /// Message published on the alert channel
    pub fn to_message(&self) -> AlertMessage {
        AlertMessage {
            alert_id: self.alert_id.clone(),
            timestamp: self.timestamp,
            severity: self.severity,
            sensor_id: self.sensor_id.clone(),
            value: self.value,
            message: self.message.clone(),
        }
    }
}

/// Wire shape of the alert channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub sensor_id: String,
    pub value: f64,
    pub message: String,
}

/// Roll-up of one source over the half-open window `[window_start, window_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub source_id: String,
    pub production_rate: f64,
    pub energy_per_unit: f64,
    pub quality_score: f64,
}

/// A message set aside for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message_id: String,
    #[serde(with = "base64_payload")]
    pub original_payload: Vec<u8>,
    pub failure_reason: String,
    pub delivery_attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

/// `original_payload` travels as standard base64 text.
pub mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
