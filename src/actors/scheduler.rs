//! SchedulerActor - periodic aggregation trigger
//!
//! Every `window_secs` the actor aggregates the last complete, epoch-aligned
//! window of every configured source. The aggregate upsert makes a repeated
//! run for the same window harmless, so no run-once bookkeeping is kept.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::{MetricsAggregator, last_complete_window};

use super::messages::{SchedulerCommand, WindowRun};

pub struct SchedulerActor {
    aggregator: MetricsAggregator,
    sources: Vec<String>,
    window: TimeDelta,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    pub fn new(
        aggregator: MetricsAggregator,
        sources: Vec<String>,
        window: TimeDelta,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            aggregator,
            sources,
            window,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let period = self.window.to_std().unwrap_or(Duration::from_secs(3_600));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::RunNow { respond_to } => {
                            debug!("received RunNow command");
                            let runs = self.run_once().await;
                            let _ = respond_to.send(runs);
                        }
                        SchedulerCommand::Shutdown => {
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

        debug!("scheduler actor stopped");
    }

    async fn run_once(&self) -> Vec<WindowRun> {
        let Some((window_start, window_end)) = last_complete_window(Utc::now(), self.window) else {
            error!("cannot align aggregation window of {}", self.window);
            return Vec::new();
        };

        let mut runs = Vec::with_capacity(self.sources.len());
        for source_id in &self.sources {
            let result = self
                .aggregator
                .aggregate(window_start, window_end, source_id)
                .await
                .map_err(|e| {
                    error!("aggregation of {source_id} failed: {e}");
                    e.to_string()
                });

            runs.push(WindowRun {
                source_id: source_id.clone(),
                window_start,
                window_end,
                result,
            });
        }

        info!(
            "aggregated window {} - {} for {} sources",
            window_start.to_rfc3339(),
            window_end.to_rfc3339(),
            runs.len()
        );
        runs
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(aggregator: MetricsAggregator, sources: Vec<String>, window: TimeDelta) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = SchedulerActor::new(aggregator, sources, window, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Aggregate the last complete window of every source now
    pub async fn run_now(&self) -> Result<Vec<WindowRun>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;
        rx.await.context("failed to receive aggregation runs")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
