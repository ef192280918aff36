//! relaywatch live ingestion daemon.
//!
//! Connects to known relays, aggregates their live event streams into the
//! SQLite store, and discovers new relays along the way.
//!
//! # Usage
//!
//! ```bash
//! # Default seeds, ./data/relaywatch.db
//! relaywatch-ingest
//!
//! # Custom seed file and database
//! relaywatch-ingest --seed-file relays.txt --db-path /var/lib/relaywatch/relaywatch.db
//! ```
//!
//! Every flag can also be set through a `RELAYWATCH_*` environment variable
//! or a `.env` file.
//!
//! # Graceful Shutdown
//!
//! On SIGINT or SIGTERM:
//! 1. Stop the reconcile, flush and discovery loops
//! 2. Stop accepting new connections
//! 3. Flush the ingest buffer
//! 4. Close all relay sockets
//! 5. Flush whatever arrived while closing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use relaywatch_core::Store;
use relaywatch_core::metrics::{init_metrics, start_metrics_server};
use relaywatch_ingest::relay::ConnectionSettings;
use relaywatch_ingest::seeds::{default_seeds, load_seed_file};
use relaywatch_ingest::{
    Crawler, CrawlerConfig, Pipeline, PipelineConfig, Supervisor, SupervisorConfig,
    graceful_shutdown,
};

/// relaywatch live ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "relaywatch-ingest")]
#[command(about = "Live Nostr relay ingestion and discovery daemon")]
#[command(version)]
struct Args {
    /// SQLite database path
    #[arg(long, env = "RELAYWATCH_DB_PATH", default_value = "./data/relaywatch.db")]
    db_path: PathBuf,

    /// Seed relay file (lines, JSON array, or {"functioning_relays": [...]})
    #[arg(long, env = "RELAYWATCH_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Maximum number of relay connection tasks
    #[arg(long, env = "RELAYWATCH_MAX_CONNECTIONS", default_value = "500")]
    max_connections: usize,

    /// Handshake timeout in seconds
    #[arg(long, env = "RELAYWATCH_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    handshake_timeout_secs: u64,

    /// Flat delay before reconnecting, in seconds
    #[arg(long, env = "RELAYWATCH_RECONNECT_DELAY_SECS", default_value = "30")]
    reconnect_delay_secs: u64,

    /// How often to pick up relays added to the store, in seconds
    #[arg(long, env = "RELAYWATCH_RECONCILE_INTERVAL_SECS", default_value = "60")]
    reconcile_interval_secs: u64,

    /// Buffered events that trigger an early flush
    #[arg(long, env = "RELAYWATCH_BATCH_SIZE", default_value = "1000")]
    batch_size: usize,

    /// Flush timer period in milliseconds
    #[arg(long, env = "RELAYWATCH_FLUSH_INTERVAL_MS", default_value = "2000")]
    flush_interval_ms: u64,

    /// Event ids kept in the in-memory dedupe window
    #[arg(long, env = "RELAYWATCH_DEDUPE_CAPACITY", default_value = "200000")]
    dedupe_capacity: usize,

    /// Buffered events beyond which new events are dropped
    #[arg(long, env = "RELAYWATCH_MAX_BUFFERED", default_value = "100000")]
    max_buffered: usize,

    /// Disable relay discovery
    #[arg(long, env = "RELAYWATCH_NO_DISCOVERY")]
    no_discovery: bool,

    /// Upper bound of the random delay before dialing a discovered relay, in seconds
    #[arg(long, env = "RELAYWATCH_DISCOVERY_JITTER_SECS", default_value = "30")]
    discovery_jitter_secs: u64,

    /// Active discovery period in seconds (0 disables the active path)
    #[arg(long, env = "RELAYWATCH_ACTIVE_DISCOVERY_INTERVAL_SECS", default_value = "900")]
    active_discovery_interval_secs: u64,

    /// Delay before the first active discovery round, in seconds
    #[arg(long, env = "RELAYWATCH_ACTIVE_DISCOVERY_INITIAL_DELAY_SECS", default_value = "120")]
    active_discovery_initial_delay_secs: u64,

    /// Authors sampled per active discovery round
    #[arg(long, env = "RELAYWATCH_DISCOVERY_SAMPLE_SIZE", default_value = "500")]
    discovery_sample_size: usize,

    /// Open connections queried per active discovery round
    #[arg(long, env = "RELAYWATCH_DISCOVERY_MAX_RELAYS", default_value = "10")]
    discovery_max_relays: usize,

    /// Authors per discovery REQ
    #[arg(long, env = "RELAYWATCH_DISCOVERY_BATCH_SIZE", default_value = "100")]
    discovery_batch_size: usize,

    /// Discovery subscriptions are closed after this many seconds
    #[arg(long, env = "RELAYWATCH_DISCOVERY_QUERY_TIMEOUT_SECS", default_value = "30")]
    discovery_query_timeout_secs: u64,

    /// Relay lists queued for discovery before new ones are dropped
    #[arg(long, env = "RELAYWATCH_DISCOVERY_QUEUE", default_value = "4096")]
    discovery_queue: usize,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "RELAYWATCH_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

impl Args {
    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            connection: ConnectionSettings {
                handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            },
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            max_connections: self.max_connections,
            ..Default::default()
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size.max(1),
            flush_interval: Duration::from_millis(self.flush_interval_ms.max(10)),
            dedupe_capacity: self.dedupe_capacity,
            max_buffered: self.max_buffered.max(self.batch_size.max(1)),
        }
    }

    fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            jitter: Duration::from_secs(self.discovery_jitter_secs),
            active_interval: Duration::from_secs(self.active_discovery_interval_secs),
            active_initial_delay: Duration::from_secs(self.active_discovery_initial_delay_secs),
            sample_size: self.discovery_sample_size,
            max_relays: self.discovery_max_relays,
            batch_size: self.discovery_batch_size,
            query_timeout: Duration::from_secs(self.discovery_query_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A second install attempt only fails if a provider is already set
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaywatch_ingest=debug")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("relaywatch ingestion daemon starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", args.metrics_port))?;
        gauge!("ingestion_running").set(1.0);
    }

    let store = Arc::new(
        Store::open(&args.db_path)
            .with_context(|| format!("Failed to open store at {}", args.db_path.display()))?,
    );
    let stale = store.mark_all_inactive()?;
    if stale > 0 {
        tracing::debug!("Cleared {} stale active flags", stale);
    }

    let seeds = match &args.seed_file {
        Some(path) => load_seed_file(path)
            .with_context(|| format!("Failed to load seed file {}", path.display()))?,
        None => default_seeds(),
    };
    let registered = store
        .register_seed_relays(&seeds)
        .context("Failed to register seed relays")?;

    tracing::info!("Configuration:");
    tracing::info!("  Database: {}", args.db_path.display());
    tracing::info!("  Seed relays: {} ({} usable)", seeds.len(), registered.len());
    tracing::info!("  Known relays: {}", store.relay_count()?);
    tracing::info!("  Max connections: {}", args.max_connections);
    tracing::info!("  Batch size: {}", args.batch_size);
    tracing::info!("  Discovery: {}", !args.no_discovery);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (relay_list_tx, relay_list_rx) = if args.no_discovery {
        (None, None)
    } else {
        let (tx, rx) = mpsc::channel(args.discovery_queue.max(1));
        (Some(tx), Some(rx))
    };

    let pipeline = Arc::new(Pipeline::new(
        args.pipeline_config(),
        Arc::clone(&store),
        relay_list_tx,
    ));
    let supervisor = Arc::new(Supervisor::new(
        args.supervisor_config(),
        Arc::clone(&store),
        Arc::clone(&pipeline),
    ));

    let mut background = Vec::new();
    background.push(tokio::spawn(
        Arc::clone(&pipeline).run_flush_loop(shutdown_rx.clone()),
    ));
    background.push(tokio::spawn(
        Arc::clone(&supervisor).run_reconcile_loop(shutdown_rx.clone()),
    ));

    let crawler = relay_list_rx.map(|rx| {
        let crawler = Arc::new(Crawler::new(
            args.crawler_config(),
            Arc::clone(&store),
            Arc::clone(&supervisor),
        ));
        background.push(tokio::spawn(
            Arc::clone(&crawler).run_passive(rx, shutdown_rx.clone()),
        ));
        background.push(tokio::spawn(
            Arc::clone(&crawler).run_active(shutdown_rx.clone()),
        ));
        crawler
    });

    tracing::info!("Starting live ingestion...");
    wait_for_signal().await;
    tracing::info!("Shutdown signal received, stopping gracefully...");

    // Background loops first, so nothing re-dials while connections close
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
    let report = graceful_shutdown(&supervisor, &pipeline, Duration::from_secs(10)).await;
    if report.lost > 0 {
        tracing::error!("{} buffered events were not aggregated", report.lost);
    }

    gauge!("ingestion_running").set(0.0);

    let stats = pipeline.stats();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:      {}", stats.received);
    tracing::info!("Events aggregated:    {}", stats.flushed);
    tracing::info!("Events deduplicated:  {}", stats.duplicates);
    tracing::info!("Events invalid:       {}", stats.invalid);
    tracing::info!("Events dropped:       {}", stats.dropped);
    tracing::info!("Flush failures:       {}", stats.flush_failures);
    tracing::info!("Relays known:         {}", store.relay_count().unwrap_or(0));
    tracing::info!(
        "Relays discovered:    {}",
        crawler.as_ref().map(|c| c.discovered_count()).unwrap_or(0)
    );

    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on Unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
