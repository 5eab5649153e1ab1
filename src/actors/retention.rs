//! RetentionActor - deletes raw readings past the retention period
//!
//! Runs once at startup and then every 24 hours. Aggregates, alerts and dead
//! letters are kept.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::storage::StorageBackend;

use super::messages::RetentionCommand;

/// Cleanup interval - run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RetentionActor {
    store: Arc<dyn StorageBackend>,
    retention_days: u32,
    command_rx: mpsc::Receiver<RetentionCommand>,
    total_deleted: usize,
}

impl RetentionActor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        retention_days: u32,
        command_rx: mpsc::Receiver<RetentionCommand>,
    ) -> Self {
        Self {
            store,
            retention_days,
            command_rx,
            total_deleted: 0,
        }
    }

    #[instrument(skip(self), fields(retention_days = self.retention_days))]
    pub async fn run(mut self) {
        debug!("starting retention actor");

        // first tick fires immediately, which is the startup cleanup
        let mut ticker = interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!("retention cleanup failed: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RetentionCommand::CleanupNow { respond_to } => {
                            let _ = respond_to.send(self.cleanup().await);
                        }
                        RetentionCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("retention actor stopped after deleting {} readings", self.total_deleted);
    }

    async fn cleanup(&mut self) -> Result<usize> {
        let cutoff = Utc::now() - TimeDelta::days(i64::from(self.retention_days));
        let deleted = self
            .store
            .cleanup_old_readings(cutoff)
            .await
            .context("failed to delete old readings")?;

        self.total_deleted += deleted;
        if deleted > 0 {
            info!("deleted {deleted} readings older than {}", cutoff.to_rfc3339());
        }
        Ok(deleted)
    }
}

/// Handle for controlling a RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    pub fn spawn(store: Arc<dyn StorageBackend>, retention_days: u32) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = RetentionActor::new(store, retention_days, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    pub async fn cleanup_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::CleanupNow { respond_to: tx })
            .await
            .context("failed to send CleanupNow command")?;
        rx.await.context("failed to receive cleanup result")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RetentionCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
