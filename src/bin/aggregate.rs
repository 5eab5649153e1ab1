use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use plant_telemetry::{
    aggregator::last_complete_window, config::read_config_file, pipeline::Pipeline,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Aggregate one window of one source and print the record as JSON
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    #[arg(long)]
    source: String,

    /// Window start (RFC3339)
    #[arg(long, requires = "end", conflicts_with = "last_window")]
    start: Option<DateTime<Utc>>,

    /// Window end (RFC3339, exclusive)
    #[arg(long, requires = "start")]
    end: Option<DateTime<Utc>>,

    /// Aggregate the last complete window of the configured length
    #[arg(long)]
    last_window: bool,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("plant_telemetry", LevelFilter::INFO),
        ("telemetry_aggregate", LevelFilter::TRACE),
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

    let (start, end) = match (args.start, args.end, args.last_window) {
        (Some(start), Some(end), false) => (start, end),
        (None, None, true) => {
            let window = TimeDelta::try_seconds(config.aggregation.window_secs as i64)
                .filter(|window| *window > TimeDelta::zero())
                .ok_or_else(|| anyhow::anyhow!("aggregation.window_secs must be positive"))?;
            last_complete_window(Utc::now(), window)
                .ok_or_else(|| anyhow::anyhow!("cannot align a window of {window}"))?
        }
        _ => anyhow::bail!("pass either --start and --end, or --last-window"),
    };

    let pipeline = Pipeline::from_config(&config).await?;
    info!("aggregating {} over [{start}, {end})", args.source);

    let record = pipeline.aggregator.aggregate(start, end, &args.source).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    pipeline.store.close().await?;
    Ok(())
}
