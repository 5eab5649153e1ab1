//! Wiring of the pipeline components from a [`Config`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::aggregator::{DefaultFormulas, MetricsAggregator};
use crate::alerts::{AlertPublisher, GuardedNotifier, Notifier};
use crate::breaker::BreakerRegistry;
use crate::config::{Config, NotificationTarget};
use crate::deadletter::{DeadLetterHandler, PipelineHealth};
use crate::detector::RuleTable;
use crate::processor::StreamProcessor;
use crate::sinks::{FanoutWriter, LatestValueSink, Sink, TimeSeriesSink};
use crate::storage::{StorageBackend, StorageResult, open_backend};
use crate::validator::Validator;

/// Breaker name of the alert notification target
pub const ALERT_NOTIFICATIONS: &str = "alert_notifications";

/// Breaker name of the operations notification target
pub const OPS_NOTIFICATIONS: &str = "ops_notifications";

/// Everything a binary needs to serve deliveries and aggregate triggers
#[derive(Clone)]
pub struct Pipeline {
    pub processor: Arc<StreamProcessor>,
    pub aggregator: MetricsAggregator,
    pub store: Arc<dyn StorageBackend>,
    pub latest_store: Arc<dyn StorageBackend>,
    pub breakers: Arc<BreakerRegistry>,
    pub health: Arc<PipelineHealth>,
}

impl Pipeline {
    /// Opens the configured stores and wires the pipeline on top of them
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = open_backend(&config.storage.clone().unwrap_or_default())
            .await
            .context("failed to open storage backend")?;

        let latest_store = match &config.latest_value_storage {
            Some(latest) => open_backend(latest)
                .await
                .context("failed to open latest-value storage backend")?,
            None => Arc::clone(&store),
        };

        let sinks = default_sinks(&store, &latest_store);
        Ok(Self::assemble(config, store, latest_store, sinks))
    }

    /// Wires the pipeline over explicit stores and sinks
    pub fn assemble(
        config: &Config,
        store: Arc<dyn StorageBackend>,
        latest_store: Arc<dyn StorageBackend>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let health = Arc::new(PipelineHealth::new());

        let guarded = |target: &Option<NotificationTarget>, name: &str| {
            target.clone().map(|target| {
                GuardedNotifier::new(Notifier::new(target), breakers.get_or_create(name))
            })
        };

        let publisher = AlertPublisher::new(
            Arc::clone(&store),
            guarded(&config.notifications.alerts, ALERT_NOTIFICATIONS),
        );
        let dead_letters = DeadLetterHandler::new(
            Arc::clone(&store),
            Arc::clone(&health),
            guarded(&config.notifications.operations, OPS_NOTIFICATIONS),
        );

        let fanout = FanoutWriter::new(
            sinks,
            Duration::from_millis(config.pipeline.sink_timeout_ms),
        );
        debug!("fan-out sinks: {:?}", fanout.sink_names());

        let processor = StreamProcessor::new(
            Validator::from_config(config),
            Arc::new(RuleTable::new(config.thresholds.clone())),
            fanout,
            publisher,
            dead_letters,
            config.pipeline.max_delivery_attempts,
        );

        let aggregator = MetricsAggregator::new(
            Arc::clone(&store),
            Arc::new(DefaultFormulas::new(&config.aggregation)),
        );

        Self {
            processor: Arc::new(processor),
            aggregator,
            store,
            latest_store,
            breakers,
            health,
        }
    }

    /// Closes the main store and, when configured separately, the latest-value store
    pub async fn close(&self) -> StorageResult<()> {
        self.store.close().await?;
        if !Arc::ptr_eq(&self.store, &self.latest_store) {
            self.latest_store.close().await?;
        }
        Ok(())
    }
}

/// Time series on `store`, latest values on `latest_store`
pub fn default_sinks(
    store: &Arc<dyn StorageBackend>,
    latest_store: &Arc<dyn StorageBackend>,
) -> Vec<Arc<dyn Sink>> {
    vec![
        Arc::new(TimeSeriesSink::new(Arc::clone(store))),
        Arc::new(LatestValueSink::new(Arc::clone(latest_store))),
    ]
}
