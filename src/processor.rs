//! Per-message orchestration: validate, fan out, detect, publish, dispose
//!
//! ```text
//! RECEIVED --validate--> VALID | INVALID ───────────────────────► DEAD_LETTER
//! VALID    --fanout----> WRITTEN(partial)
//!                          ├─ non-retryable sink failure ───────► DEAD_LETTER
//!                          ├─ retryable failure, attempts left ─► REDELIVER
//!                          ├─ retryable failure, exhausted ─────► DEAD_LETTER
//!                          └─ all sinks ok ─────────────────────► ACK
//! WRITTEN  --detect----> ALERT_EMITTED | NO_ALERT
//! ```
//!
//! Detection runs whenever at least one sink stored the reading, and also when
//! the message is about to be dead-lettered. It is skipped only when every
//! sink failed and the broker will deliver the message again.
//!
//! A [`StreamProcessor`] holds no per-message state, so one instance serves
//! any number of concurrent deliveries.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::SensorReading;
use crate::alerts::AlertPublisher;
use crate::broker::Delivery;
use crate::deadletter::{DeadLetterHandler, PipelineHealth};
use crate::detector::RuleTable;
use crate::sinks::{FanoutWriter, PartialResult};
use crate::validator::Validator;

/// What the broker should do with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every sink stored the reading
    Stored { alert_id: Option<String> },
    /// Some sinks failed; the message was either dead-lettered or will be redelivered
    Partial {
        partial: PartialResult,
        alert_id: Option<String>,
        redeliver: bool,
    },
    /// Set aside without touching any sink
    Invalid { reason: String },
    DeadLettered { reason: String, alert_id: Option<String> },
    Redeliver { reason: String },
}

impl Outcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::Redeliver { .. } | Outcome::Partial { redeliver: true, .. } => Disposition::Nack,
            _ => Disposition::Ack,
        }
    }

    pub fn alert_id(&self) -> Option<&str> {
        match self {
            Outcome::Stored { alert_id }
            | Outcome::Partial { alert_id, .. }
            | Outcome::DeadLettered { alert_id, .. } => alert_id.as_deref(),
            Outcome::Invalid { .. } | Outcome::Redeliver { .. } => None,
        }
    }
}

/// Failure handling decided from the fan-out result
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Complete,
    Redeliver(String),
    DeadLetter(String),
}

pub struct StreamProcessor {
    validator: Validator,
    rules: Arc<RuleTable>,
    fanout: FanoutWriter,
    publisher: AlertPublisher,
    dead_letters: DeadLetterHandler,
    health: Arc<PipelineHealth>,
    max_delivery_attempts: u32,
}

impl StreamProcessor {
    pub fn new(
        validator: Validator,
        rules: Arc<RuleTable>,
        fanout: FanoutWriter,
        publisher: AlertPublisher,
        dead_letters: DeadLetterHandler,
        max_delivery_attempts: u32,
    ) -> Self {
        let health = Arc::clone(dead_letters.health());
        Self {
            validator,
            rules,
            fanout,
            publisher,
            dead_letters,
            health,
            max_delivery_attempts: max_delivery_attempts.max(1),
        }
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn publisher(&self) -> &AlertPublisher {
        &self.publisher
    }

    pub fn dead_letters(&self) -> &DeadLetterHandler {
        &self.dead_letters
    }

    #[instrument(skip_all, fields(message_id = %delivery.message_id, attempt = delivery.delivery_attempt))]
    pub async fn handle(&self, delivery: &Delivery) -> Outcome {
        self.health.record_received();
        let attempt = delivery.delivery_attempt.max(1);

        let reading = match self.validator.validate(&delivery.payload) {
            Ok(reading) => reading,
            Err(err) => {
                info!("rejecting invalid message: {}", err.reason);
                self.dead_letters
                    .handle(&delivery.message_id, &delivery.payload, &err.to_string(), attempt)
                    .await;
                return self.settle(Outcome::Invalid { reason: err.reason });
            }
        };

        let partial = self.fanout.write(&reading).await;
        let mut verdict = self.verdict(&partial, attempt);

        let detect = partial.any_ok() || matches!(verdict, Verdict::DeadLetter(_));
        let alert_id = if detect {
            match self.detect(&reading).await {
                Ok(alert_id) => alert_id,
                Err(reason) => {
                    verdict = self.escalate(verdict, reason, attempt);
                    None
                }
            }
        } else {
            debug!("every sink failed, deferring detection to the redelivery");
            None
        };

        let outcome = match verdict {
            Verdict::Complete if partial.all_ok() => Outcome::Stored { alert_id },
            Verdict::Complete => Outcome::Partial {
                partial,
                alert_id,
                redeliver: false,
            },
            Verdict::Redeliver(reason) if partial.all_ok() => Outcome::Redeliver { reason },
            Verdict::Redeliver(_) if partial.any_ok() => Outcome::Partial {
                partial,
                alert_id,
                redeliver: true,
            },
            Verdict::Redeliver(reason) => Outcome::Redeliver { reason },
            Verdict::DeadLetter(reason) => {
                self.dead_letters
                    .handle(&delivery.message_id, &delivery.payload, &reason, attempt)
                    .await;
                Outcome::DeadLettered { reason, alert_id }
            }
        };

        self.settle(outcome)
    }

    fn verdict(&self, partial: &PartialResult, attempt: u32) -> Verdict {
        if partial.all_ok() {
            return Verdict::Complete;
        }

        let summary = partial.failure_summary();
        if partial.has_non_retryable() {
            return Verdict::DeadLetter(format!("non-retryable sink failure: {summary}"));
        }
        self.retry_or_give_up(summary, attempt)
    }

    fn retry_or_give_up(&self, reason: String, attempt: u32) -> Verdict {
        if attempt >= self.max_delivery_attempts {
            Verdict::DeadLetter(format!(
                "delivery attempts exhausted ({attempt}/{}): {reason}",
                self.max_delivery_attempts
            ))
        } else {
            Verdict::Redeliver(reason)
        }
    }

    /// Folds a failed alert publication into the verdict
    fn escalate(&self, verdict: Verdict, reason: String, attempt: u32) -> Verdict {
        match verdict {
            Verdict::Complete => self.retry_or_give_up(reason, attempt),
            Verdict::Redeliver(earlier) => Verdict::Redeliver(format!("{earlier}; {reason}")),
            Verdict::DeadLetter(earlier) => Verdict::DeadLetter(format!("{earlier}; {reason}")),
        }
    }

    /// Returns the id of the published alert, or why publishing failed
    async fn detect(&self, reading: &SensorReading) -> Result<Option<String>, String> {
        let Some(alert) = self.rules.evaluate(reading) else {
            return Ok(None);
        };

        match self.publisher.publish(&alert).await {
            Ok(()) => {
                self.health.record_alert();
                Ok(Some(alert.alert_id))
            }
            Err(err) => {
                warn!("failed to record alert {}: {err}", alert.alert_id);
                Err(format!("alert persistence failed: {err}"))
            }
        }
    }

    fn settle(&self, outcome: Outcome) -> Outcome {
        match outcome.disposition() {
            Disposition::Ack => self.health.record_acked(),
            Disposition::Nack => self.health.record_redelivery(),
        }
        debug!("message settled: {outcome:?}");
        outcome
    }
}
