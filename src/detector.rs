//! Threshold evaluation of single readings
//!
//! Bounds are inclusive: a reading exactly at `min` or `max` is a breach.
//! Every breach yields a fresh alert; repeated breaches are not merged.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ThresholdRule;
use crate::{Alert, AlertStatus, SensorReading};

/// Which bound a reading crossed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Breach {
    BelowMin(f64),
    AboveMax(f64),
}

impl ThresholdRule {
    pub fn check(&self, value: f64) -> Option<Breach> {
        match (self.min, self.max) {
            (Some(min), _) if value <= min => Some(Breach::BelowMin(min)),
            (_, Some(max)) if value >= max => Some(Breach::AboveMax(max)),
            _ => None,
        }
    }
}

/// Read-only rule lookup shared by all handler invocations
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<ThresholdRule>,
    index: HashMap<String, usize>,
}

impl RuleTable {
    /// Builds the table; a later rule for an already covered sensor is ignored
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        let mut index = HashMap::new();
        for (position, rule) in rules.iter().enumerate() {
            if let Some(first) = index.get(&rule.sensor_id) {
                warn!(
                    "duplicate threshold rule for sensor '{}' at position {position}, keeping rule at position {first}",
                    rule.sensor_id
                );
                continue;
            }
            index.insert(rule.sensor_id.clone(), position);
        }

        Self { rules, index }
    }

    pub fn rule_for(&self, sensor_id: &str) -> Option<&ThresholdRule> {
        self.index.get(sensor_id).map(|i| &self.rules[*i])
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    pub fn evaluate(&self, reading: &SensorReading) -> Option<Alert> {
        let rule = self.rule_for(&reading.sensor_id)?;
        alert_for(reading, rule)
    }
}

/// Evaluates `reading` against an ordered rule list; the first matching rule wins
pub fn evaluate(reading: &SensorReading, rules: &[ThresholdRule]) -> Option<Alert> {
    let mut matching = rules.iter().filter(|r| r.sensor_id == reading.sensor_id);
    let rule = matching.next()?;
    if matching.next().is_some() {
        warn!(
            "multiple threshold rules for sensor '{}', using the first one",
            reading.sensor_id
        );
    }
    alert_for(reading, rule)
}

fn alert_for(reading: &SensorReading, rule: &ThresholdRule) -> Option<Alert> {
    let breach = rule.check(reading.value)?;

    let message = match breach {
        Breach::BelowMin(min) => format!(
            "{} on {} is {} (minimum {})",
            reading.sensor_id, reading.source_id, reading.value, min
        ),
        Breach::AboveMax(max) => format!(
            "{} on {} is {} (maximum {})",
            reading.sensor_id, reading.source_id, reading.value, max
        ),
    };
    debug!("threshold breached: {message}");

    Some(Alert {
        alert_id: Uuid::new_v4().to_string(),
        timestamp: reading.timestamp,
        severity: rule.severity,
        source_id: reading.source_id.clone(),
        sensor_id: reading.sensor_id.clone(),
        value: reading.value,
        message,
        status: AlertStatus::New,
    })
}
