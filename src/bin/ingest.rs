use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use clap::Parser;
use plant_telemetry::{
    actors::{DispatcherHandle, RetentionHandle, SchedulerHandle},
    api::{ApiConfig, ApiState, spawn_api_server},
    broker::MemoryBroker,
    config::{Config, read_config_file},
    pipeline::Pipeline,
    util,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Feed newline-delimited readings through the in-memory broker, then exit
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Ack deadline of the replay broker in seconds
    #[arg(long, default_value_t = 30)]
    ack_deadline: u64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("plant_telemetry", LevelFilter::DEBUG),
        ("telemetry_ingest", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let pipeline = Pipeline::from_config(&config).await?;

    if let Some(path) = &args.replay {
        return replay(&config, pipeline, path, Duration::from_secs(args.ack_deadline)).await;
    }

    serve(&config, pipeline).await
}

async fn serve(config: &Config, pipeline: Pipeline) -> anyhow::Result<()> {
    let scheduler = spawn_scheduler(config, &pipeline);
    let retention = config
        .storage
        .clone()
        .unwrap_or_default()
        .retention_days()
        .map(|days| RetentionHandle::spawn(Arc::clone(&pipeline.store), days));

    let mut api_config = ApiConfig::new(config.api.bind.unwrap_or_else(util::get_bind_addr));
    api_config.auth_token = config.api.auth_token.clone().or_else(util::get_token);
    if api_config.auth_token.is_none() {
        warn!("API runs without authentication");
    }

    let addr = spawn_api_server(api_config, ApiState::new(pipeline.clone())).await?;
    info!("accepting pushes on http://{addr}/api/v1/push");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            error!("scheduler shutdown: {e}");
        }
    }
    if let Some(retention) = retention {
        if let Err(e) = retention.shutdown().await {
            error!("retention shutdown: {e}");
        }
    }
    pipeline.close().await?;

    Ok(())
}

fn spawn_scheduler(config: &Config, pipeline: &Pipeline) -> Option<SchedulerHandle> {
    let aggregation = &config.aggregation;
    if aggregation.window_secs == 0 || aggregation.sources.is_empty() {
        debug!("aggregation scheduler disabled");
        return None;
    }

    let window = TimeDelta::try_seconds(aggregation.window_secs as i64)?;
    Some(SchedulerHandle::spawn(
        pipeline.aggregator.clone(),
        aggregation.sources.clone(),
        window,
    ))
}

async fn replay(
    config: &Config,
    pipeline: Pipeline,
    path: &Path,
    ack_deadline: Duration,
) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let broker = Arc::new(MemoryBroker::new(ack_deadline));
    let mut lines = BufReader::new(file).lines();
    let mut published = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        broker.publish(line.into_bytes());
        published += 1;
    }
    info!("replaying {published} messages from {}", path.display());

    let dispatcher = DispatcherHandle::spawn(
        broker.clone(),
        Arc::clone(&pipeline.processor),
        config.pipeline.max_in_flight,
    );

    broker.wait_drained().await;
    let dispatched = dispatcher.shutdown().await?;
    broker.close();

    let stats = pipeline.health.stats();
    info!(
        "replay finished: pulled={} acked={} nacked={} dead_lettered={} alerts={}",
        dispatched.pulled, dispatched.acked, dispatched.nacked, stats.dead_lettered, stats.alerts_emitted
    );
    if !pipeline.health.is_healthy() {
        anyhow::bail!(
            "{} dead letters could not be persisted",
            stats.dead_letter_persist_failures
        );
    }

    pipeline.close().await?;
    Ok(())
}
