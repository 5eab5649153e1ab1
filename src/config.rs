use std::path::PathBuf;

use tracing::trace;

use crate::Severity;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (raw readings older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./telemetry.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Threshold rules, in load order
    #[serde(default)]
    pub thresholds: Vec<ThresholdRule>,

    /// Sensors accepted by the validator in addition to the ones with a rule
    #[serde(default)]
    pub known_sensors: Vec<String>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Storage configuration (time series, alerts, dead letters, aggregates)
    pub storage: Option<StorageConfig>,

    /// Separate store for the latest-value sink; shares `storage` if absent
    pub latest_value_storage: Option<StorageConfig>,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub api: ApiSettings,
}

/// Per-sensor bounds. A bound that is `None` is not checked.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThresholdRule {
    pub sensor_id: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub severity: Severity,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PipelineConfig {
    /// Deliveries allowed before a retryable failure is dead-lettered
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Timeout applied to each individual sink write
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,

    /// Concurrent handler invocations when pulling from a broker
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: default_max_delivery_attempts(),
            sink_timeout_ms: default_sink_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_sink_timeout_ms() -> u64 {
    2_000
}

fn default_max_in_flight() -> usize {
    64
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NotificationConfig {
    /// Where threshold alerts are delivered
    pub alerts: Option<NotificationTarget>,

    /// Where operational problems (dead letters, persist failures) are delivered
    pub operations: Option<NotificationTarget>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTarget {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before a half-open trial call is let through
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for each guarded call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AggregationConfig {
    /// Sources rolled up by the built-in scheduler
    #[serde(default)]
    pub sources: Vec<String>,

    /// Length of one aggregation window; `0` disables the scheduler
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Sensor counting produced units
    #[serde(default = "default_production_sensor")]
    pub production_sensor: String,

    /// Sensor reporting consumed energy (kWh per reading)
    #[serde(default = "default_energy_sensor")]
    pub energy_sensor: String,

    /// Sensor reporting a quality index in `[0, 1]`
    #[serde(default = "default_quality_sensor")]
    pub quality_sensor: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            window_secs: default_window_secs(),
            production_sensor: default_production_sensor(),
            energy_sensor: default_energy_sensor(),
            quality_sensor: default_quality_sensor(),
        }
    }
}

fn default_window_secs() -> u64 {
    3_600
}

fn default_production_sensor() -> String {
    "units_produced".to_string()
}

fn default_energy_sensor() -> String {
    "energy_kwh".to_string()
}

fn default_quality_sensor() -> String {
    "quality_index".to_string()
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ApiSettings {
    /// Bind address, falls back to `INGEST_ADDR`/`INGEST_PORT`
    pub bind: Option<std::net::SocketAddr>,

    /// Bearer token required on every request
    pub auth_token: Option<String>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
