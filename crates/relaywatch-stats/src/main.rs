//! relaywatch statistics daemon.
//!
//! Recomputes range snapshots from the store the ingestion daemon writes to.
//!
//! # Usage
//!
//! ```bash
//! relaywatch-stats --db-path ./data/relaywatch.db --stats-interval-secs 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use relaywatch_core::Store;
use relaywatch_core::metrics::{init_metrics, start_metrics_server};
use relaywatch_stats::{Aggregator, AggregatorConfig, SnapshotCache};

/// relaywatch statistics daemon.
#[derive(Parser, Debug)]
#[command(name = "relaywatch-stats")]
#[command(about = "Multi-range statistics aggregator for relaywatch")]
#[command(version)]
struct Args {
    /// SQLite database path (shared with relaywatch-ingest)
    #[arg(long, env = "RELAYWATCH_DB_PATH", default_value = "./data/relaywatch.db")]
    db_path: PathBuf,

    /// Seconds between statistics passes
    #[arg(long, env = "RELAYWATCH_STATS_INTERVAL_SECS", default_value = "60")]
    stats_interval_secs: u64,

    /// Seconds before the first pass
    #[arg(long, env = "RELAYWATCH_STATS_INITIAL_DELAY_SECS", default_value = "5")]
    stats_initial_delay_secs: u64,

    /// Seconds between retention runs
    #[arg(long, env = "RELAYWATCH_RETENTION_INTERVAL_SECS", default_value = "3600")]
    retention_interval_secs: u64,

    /// Hours of snapshot history to keep (the newest per range is always kept)
    #[arg(long, env = "RELAYWATCH_SNAPSHOT_RETENTION_HOURS", default_value = "24")]
    snapshot_retention_hours: u64,

    /// Days of author and processed-id index rows to keep
    #[arg(long, env = "RELAYWATCH_INDEX_RETENTION_DAYS", default_value = "90")]
    index_retention_days: u32,

    /// Rows in top-N tables
    #[arg(long, env = "RELAYWATCH_TOP_N", default_value = "20")]
    top_n: usize,

    /// Snapshot cache TTL in seconds
    #[arg(long, env = "RELAYWATCH_CACHE_TTL_SECS", default_value = "300")]
    cache_ttl_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "RELAYWATCH_STATS_METRICS_PORT", default_value = "9091")]
    metrics_port: u16,
}

impl Args {
    fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            stats_interval: Duration::from_secs(self.stats_interval_secs.max(1)),
            stats_initial_delay: Duration::from_secs(self.stats_initial_delay_secs),
            retention_interval: Duration::from_secs(self.retention_interval_secs.max(1)),
            snapshot_retention: Duration::from_secs(self.snapshot_retention_hours * 3600),
            index_retention_days: self.index_retention_days,
            top_n: self.top_n.max(1),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaywatch_stats=debug")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("relaywatch statistics daemon starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", args.metrics_port))?;
    }

    let store = Arc::new(
        Store::open(&args.db_path)
            .with_context(|| format!("Failed to open store at {}", args.db_path.display()))?,
    );

    let config = args.aggregator_config();
    tracing::info!("Configuration:");
    tracing::info!("  Database: {}", args.db_path.display());
    tracing::info!("  Stats interval: {:?}", config.stats_interval);
    tracing::info!("  Retention interval: {:?}", config.retention_interval);
    tracing::info!("  Snapshot retention: {:?}", config.snapshot_retention);
    tracing::info!("  Index retention: {} days", config.index_retention_days);
    tracing::info!("  Top N: {}", config.top_n);

    let cache = SnapshotCache::new(Arc::clone(&store), Duration::from_secs(args.cache_ttl_secs));
    let aggregator = Arc::new(Aggregator::new(config, store, cache));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = tokio::spawn(Arc::clone(&aggregator).run(shutdown_rx.clone()));
    let retention = tokio::spawn(Arc::clone(&aggregator).run_retention(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping...");

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("stats", stats), ("retention", retention)] {
        if let Err(e) = handle.await {
            tracing::warn!("{} task ended abnormally: {}", name, e);
        }
    }

    tracing::info!("relaywatch statistics daemon stopped");
    Ok(())
}
