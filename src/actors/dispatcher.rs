//! DispatcherActor - pulls deliveries from a subscription and runs the processor
//!
//! ## Message Flow
//!
//! ```text
//! Subscription::pull ──► one task per delivery ──► StreamProcessor::handle
//!        ▲                  (≤ max_in_flight)              │
//!        │                                                 ▼
//!        └────────────── ack / nack ◄──────────── Outcome::disposition
//! ```
//!
//! A permit of the in-flight semaphore is taken before pulling, so the actor
//! never holds more deliveries than it can work on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, trace, warn};

use crate::broker::{BrokerError, Delivery, Subscription};
use crate::processor::{Disposition, StreamProcessor};

use super::messages::{DispatchStats, DispatcherCommand};

/// Back-off after a failed pull
const PULL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Counters {
    pulled: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    broker_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            pulled: self.pulled.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct DispatcherActor {
    subscription: Arc<dyn Subscription>,
    processor: Arc<StreamProcessor>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    command_rx: mpsc::Receiver<DispatcherCommand>,
}

impl DispatcherActor {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        processor: Arc<StreamProcessor>,
        max_in_flight: usize,
        command_rx: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            subscription,
            processor,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            counters: Arc::new(Counters::default()),
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting dispatcher actor");
        let mut tasks = JoinSet::new();
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        DispatcherCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.counters.snapshot());
                        }
                        DispatcherCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            shutdown_reply = Some(respond_to);
                            break;
                        }
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("delivery task failed: {e}");
                    }
                }

                result = pull_batch(&self.subscription, &self.permits, &self.counters) => {
                    match result {
                        Ok(deliveries) => {
                            for (delivery, permit) in deliveries {
                                let subscription = Arc::clone(&self.subscription);
                                let processor = Arc::clone(&self.processor);
                                let counters = Arc::clone(&self.counters);
                                tasks.spawn(async move {
                                    let outcome = processor.handle(&delivery).await;
                                    let settled = match outcome.disposition() {
                                        Disposition::Ack => {
                                            counters.acked.fetch_add(1, Ordering::Relaxed);
                                            subscription.ack(&delivery).await
                                        }
                                        Disposition::Nack => {
                                            counters.nacked.fetch_add(1, Ordering::Relaxed);
                                            subscription.nack(&delivery).await
                                        }
                                    };
                                    if let Err(e) = settled {
                                        warn!("failed to settle {}: {e}", delivery.message_id);
                                    }
                                    drop(permit);
                                });
                            }
                        }
                        Err(BrokerError::Closed) => {
                            debug!("subscription closed, stopping dispatcher");
                            break;
                        }
                        Err(e) => {
                            self.counters.broker_errors.fetch_add(1, Ordering::Relaxed);
                            warn!("pull failed: {e}");
                            tokio::time::sleep(PULL_ERROR_BACKOFF).await;
                        }
                    }
                }

                else => break,
            }
        }

        trace!("waiting for {} deliveries in flight", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("delivery task failed: {e}");
            }
        }

        let stats = self.counters.snapshot();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(stats);
        }
        debug!("dispatcher actor stopped: {stats:?}");
    }
}

/// Waits for at least one free permit, then pulls as many deliveries as there are permits
async fn pull_batch(
    subscription: &Arc<dyn Subscription>,
    permits: &Arc<Semaphore>,
    counters: &Counters,
) -> Result<Vec<(Delivery, OwnedSemaphorePermit)>, BrokerError> {
    let first = Arc::clone(permits)
        .acquire_owned()
        .await
        .map_err(|_| BrokerError::Closed)?;

    let mut held = vec![first];
    while let Ok(permit) = Arc::clone(permits).try_acquire_owned() {
        held.push(permit);
    }

    let deliveries = subscription.pull(held.len()).await?;
    counters
        .pulled
        .fetch_add(deliveries.len() as u64, Ordering::Relaxed);
    trace!("pulled {} deliveries", deliveries.len());

    // unused permits are released when `held` is dropped
    Ok(deliveries.into_iter().zip(held).collect())
}

/// Handle for controlling a DispatcherActor
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub fn spawn(
        subscription: Arc<dyn Subscription>,
        processor: Arc<StreamProcessor>,
        max_in_flight: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = DispatcherActor::new(subscription, processor, max_in_flight, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    pub async fn stats(&self) -> Result<DispatchStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive dispatcher stats")
    }

    /// Stops pulling and waits for deliveries in flight
    pub async fn shutdown(&self) -> Result<DispatchStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;
        rx.await.context("failed to receive final dispatcher stats")
    }
}
