//! Dead-letter handling and pipeline health counters
//!
//! [`DeadLetterHandler::handle`] never fails. A record that cannot be stored
//! is logged at error level, counted in [`PipelineHealth`] (which turns the
//! process unhealthy) and reported on the operations notification target.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::DeadLetterRecord;
use crate::alerts::{GuardedNotifier, OperationalNotice};
use crate::error::DeadLetterPersistError;
use crate::storage::StorageBackend;

/// Process-wide counters shared by the processor, dead-letter handler and API
#[derive(Debug, Default)]
pub struct PipelineHealth {
    received: AtomicU64,
    acked: AtomicU64,
    redelivery_requested: AtomicU64,
    dead_lettered: AtomicU64,
    alerts_emitted: AtomicU64,
    dead_letter_persist_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub acked: u64,
    pub redelivery_requested: u64,
    pub dead_lettered: u64,
    pub alerts_emitted: u64,
    pub dead_letter_persist_failures: u64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redelivery(&self) {
        self.redelivery_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_persist_failure(&self) {
        self.dead_letter_persist_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// `false` once any dead letter could not be stored
    pub fn is_healthy(&self) -> bool {
        self.dead_letter_persist_failures.load(Ordering::Relaxed) == 0
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            redelivery_requested: self.redelivery_requested.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            dead_letter_persist_failures: self.dead_letter_persist_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct DeadLetterHandler {
    store: Arc<dyn StorageBackend>,
    health: Arc<PipelineHealth>,
    notifier: Option<GuardedNotifier>,
}

impl DeadLetterHandler {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        health: Arc<PipelineHealth>,
        notifier: Option<GuardedNotifier>,
    ) -> Self {
        Self {
            store,
            health,
            notifier,
        }
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    #[instrument(skip(self, payload, reason))]
    pub async fn handle(&self, message_id: &str, payload: &[u8], reason: &str, attempts: u32) {
        let record = DeadLetterRecord {
            message_id: message_id.to_string(),
            original_payload: payload.to_vec(),
            failure_reason: reason.to_string(),
            delivery_attempts: attempts,
            recorded_at: Utc::now(),
        };

        match self.persist(&record).await {
            Ok(true) => {
                self.health.record_dead_letter();
                warn!("message {message_id} dead-lettered after {attempts} attempt(s): {reason}");
                self.notify(OperationalNotice {
                    title: "Message dead-lettered".to_string(),
                    detail: format!(
                        "message `{message_id}` after {attempts} attempt(s): {reason}"
                    ),
                })
                .await;
            }
            Ok(false) => {
                info!("dead letter {message_id} already recorded");
            }
            Err(err) => {
                self.health.record_persist_failure();
                error!("{err}");
                self.notify(OperationalNotice {
                    title: "Dead letter lost".to_string(),
                    detail: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn persist(&self, record: &DeadLetterRecord) -> Result<bool, DeadLetterPersistError> {
        self.store
            .insert_dead_letter(record)
            .await
            .map_err(|source| DeadLetterPersistError {
                message_id: record.message_id.clone(),
                source,
            })
    }

    async fn notify(&self, notice: OperationalNotice) {
        if let Some(notifier) = &self.notifier {
            notifier.operational(&notice).await;
        }
    }
}
