//! flurry: stages S3 event/song logs into a warehouse star schema.
//!
//! One invocation executes one pipeline run: create tables, stage the two
//! external datasets, load the fact and dimension tables, then verify the
//! results with data-quality checks. Scheduling recurring runs belongs to
//! cron or an external scheduler.

use chrono::{NaiveDate, Utc};
use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use flurry::error::{
    AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError, RunFailedSnafu,
};
use flurry::{Config, build_graph, metrics, run_pipeline};

/// Star-schema ETL orchestrator.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Logical date of the run (YYYY-MM-DD, default: today UTC).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Dry run - validate configuration and print the plan without
    /// touching the warehouse.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("flurry starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;
    let logical_date = args.date.unwrap_or_else(|| Utc::now().date_naive());

    // Initialize metrics if enabled
    if config.metrics.enabled && !args.dry_run {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Logical date: {}", logical_date);
        info!(
            "Events source: s3://{}/{}",
            config.sources.events.bucket, config.sources.events.key
        );
        info!(
            "Songs source: s3://{}/{}",
            config.sources.songs.bucket, config.sources.songs.key
        );
        info!("Load mode: {:?}", config.load.mode);
        info!(
            "Retry policy: {} retries, {}s delay",
            config.retry.retries, config.retry.delay_secs
        );

        let graph = build_graph(&config).context(flurry::error::GraphSnafu)?;
        info!("Plan ({} nodes):", graph.len());
        for name in graph.node_names() {
            info!("  - {}", name);
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let report = run_pipeline(config, logical_date).await?;

    if let Some(failure) = report.first_failure() {
        return RunFailedSnafu {
            node: failure.name.as_str(),
            message: failure
                .error
                .clone()
                .unwrap_or_else(|| format!("node ended {:?}", failure.state)),
        }
        .fail();
    }

    info!("Pipeline completed successfully");
    for node in &report.nodes {
        if let Some(rows) = node.rows {
            info!("  {}: {} rows", node.name, rows);
        }
    }

    Ok(())
}
