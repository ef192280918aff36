//! Periodic statistics passes and retention.
//!
//! ```text
//! every stats_interval:
//!   pass_start = now (read once)
//!   health scores ──► relays.health_score
//!   for range in 24h, 7d, 30d, 90d, all:
//!       compute (one read transaction) ──► insert_snapshot ──► cache
//!       24h only: top-relay ranks ──► relays.rank
//!
//! every retention_interval:
//!   prune old snapshot versions and side-index rows
//! ```
//!
//! A range that fails is logged and skipped. Its previous snapshot stays in
//! the store and the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::watch;

use relaywatch_core::{Store, day_key};

use crate::queries::compute_range;
use crate::scoring::compute_health_scores;
use crate::snapshot::{RangeStats, StatisticsSnapshot};
use crate::{Result, SnapshotCache, TimeRange};

/// Aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Time between passes.
    pub stats_interval: Duration,
    /// Delay before the first pass.
    pub stats_initial_delay: Duration,
    /// Time between retention runs.
    pub retention_interval: Duration,
    /// Snapshot versions older than this are pruned (newest per range kept).
    pub snapshot_retention: Duration,
    /// Author and processed-id index rows older than this many days are pruned.
    pub index_retention_days: u32,
    /// Rows in the top-N tables.
    pub top_n: usize,
    /// Event volume window for health scores, in days.
    pub health_window_days: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(60),
            stats_initial_delay: Duration::from_secs(5),
            retention_interval: Duration::from_secs(3600),
            snapshot_retention: Duration::from_secs(24 * 3600),
            index_retention_days: 90,
            top_n: 20,
            health_window_days: 7,
        }
    }
}

/// Computes one range's body. Blocking.
pub trait RangeComputer: Send + Sync {
    fn compute(
        &self,
        store: &Store,
        range: TimeRange,
        pass_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<RangeStats>;
}

/// Computes ranges with SQL over the aggregate tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlRangeComputer;

impl RangeComputer for SqlRangeComputer {
    fn compute(
        &self,
        store: &Store,
        range: TimeRange,
        pass_start: DateTime<Utc>,
        top_n: usize,
    ) -> Result<RangeStats> {
        Ok(store.read_tx(|tx| Ok(compute_range(tx, range, pass_start, top_n)?))?)
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub published: Vec<(TimeRange, u64)>,
    pub failed: Vec<TimeRange>,
    pub relays_scored: usize,
}

/// Rows removed by one retention run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub snapshots: usize,
    pub index_rows: usize,
}

/// Statistics aggregator.
pub struct Aggregator {
    config: AggregatorConfig,
    store: Arc<Store>,
    cache: SnapshotCache,
    computer: Arc<dyn RangeComputer>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, store: Arc<Store>, cache: SnapshotCache) -> Self {
        Self::with_computer(config, store, cache, Arc::new(SqlRangeComputer))
    }

    pub fn with_computer(
        config: AggregatorConfig,
        store: Arc<Store>,
        cache: SnapshotCache,
        computer: Arc<dyn RangeComputer>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            computer,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Run one pass starting now.
    pub async fn run_pass(&self) -> PassReport {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass with every window anchored at `pass_start`.
    pub async fn run_pass_at(&self, pass_start: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        match self.update_health_scores(pass_start).await {
            Ok(n) => report.relays_scored = n,
            Err(e) => tracing::warn!("Health score update failed: {}", e),
        }

        for range in TimeRange::ALL {
            let started = Instant::now();
            match self.publish_range(range, pass_start).await {
                Ok(snapshot) => {
                    histogram!("stats_range_duration_seconds", "range" => range.as_str())
                        .record(started.elapsed().as_secs_f64());
                    counter!("stats_snapshots_published_total", "range" => range.as_str())
                        .increment(1);
                    tracing::debug!(
                        %range,
                        version = snapshot.version,
                        events = snapshot.stats.overview.events,
                        "Published snapshot"
                    );
                    report.published.push((range, snapshot.version));

                    if range == TimeRange::Day {
                        if let Err(e) = self.record_ranks(&snapshot).await {
                            tracing::warn!("Failed to persist relay ranks: {}", e);
                        }
                    }
                }
                Err(e) => {
                    counter!("stats_pass_failures_total", "range" => range.as_str()).increment(1);
                    tracing::error!(%range, "Range computation failed, keeping previous snapshot: {}", e);
                    report.failed.push(range);
                }
            }
        }

        counter!("stats_passes_total").increment(1);
        report
    }

    async fn update_health_scores(&self, pass_start: DateTime<Utc>) -> Result<usize> {
        let since = day_key(
            (pass_start - chrono::Duration::days(i64::from(self.config.health_window_days)))
                .date_naive(),
        );
        let store = Arc::clone(&self.store);
        let scored = tokio::task::spawn_blocking(move || -> Result<usize> {
            let inputs = store.relay_health_inputs(&since)?;
            let scores: Vec<(String, f64)> = compute_health_scores(&inputs)
                .into_iter()
                .map(|h| (h.url, h.score))
                .collect();
            store.update_health_scores(&scores)?;
            Ok(scores.len())
        })
        .await??;
        Ok(scored)
    }

    /// Compute, store, then cache one range.
    async fn publish_range(
        &self,
        range: TimeRange,
        pass_start: DateTime<Utc>,
    ) -> Result<Arc<StatisticsSnapshot>> {
        let store = Arc::clone(&self.store);
        let computer = Arc::clone(&self.computer);
        let top_n = self.config.top_n;
        let computed_at = pass_start.timestamp();

        let snapshot = tokio::task::spawn_blocking(move || -> Result<StatisticsSnapshot> {
            let stats = computer.compute(&store, range, pass_start, top_n)?;
            let payload = serde_json::to_string(&stats)?;
            let version = store.insert_snapshot(range.as_str(), computed_at, &payload)?;
            Ok(StatisticsSnapshot {
                range,
                version,
                computed_at,
                stats,
            })
        })
        .await??;

        let snapshot = Arc::new(snapshot);
        self.cache.insert(Arc::clone(&snapshot)).await?;
        Ok(snapshot)
    }

    async fn record_ranks(&self, snapshot: &StatisticsSnapshot) -> Result<()> {
        let ranks: Vec<(String, u32)> = snapshot
            .stats
            .top_relays
            .iter()
            .map(|r| (r.url.clone(), r.rank))
            .collect();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.record_relay_ranks(&ranks)).await??;
        Ok(())
    }

    /// Prune snapshots and side indexes as of `now`.
    pub async fn run_retention_at(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let snapshot_cutoff = now.timestamp() - self.config.snapshot_retention.as_secs() as i64;
        let index_cutoff = day_key(
            (now - chrono::Duration::days(i64::from(self.config.index_retention_days)))
                .date_naive(),
        );
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || -> Result<RetentionReport> {
            Ok(RetentionReport {
                snapshots: store.prune_snapshots(snapshot_cutoff)?,
                index_rows: store.prune_indexes(&index_cutoff)?,
            })
        })
        .await??;

        counter!("stats_retention_rows_pruned_total")
            .increment((report.snapshots + report.index_rows) as u64);
        if report.snapshots + report.index_rows > 0 {
            tracing::info!(
                snapshots = report.snapshots,
                index_rows = report.index_rows,
                "Retention pruned old rows"
            );
        }
        Ok(report)
    }

    /// Run passes on the configured schedule until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let interval = self.config.stats_interval;
        let delay = self.config.stats_initial_delay;
        let aggregator = Arc::clone(&self);
        run_every(delay, interval, shutdown, move || {
            let aggregator = Arc::clone(&aggregator);
            async move {
                let report = aggregator.run_pass().await;
                tracing::info!(
                    published = report.published.len(),
                    failed = report.failed.len(),
                    relays_scored = report.relays_scored,
                    "Statistics pass complete"
                );
            }
        })
        .await;
        tracing::debug!("Statistics loop stopped");
    }

    /// Run retention on the configured schedule until `shutdown`.
    pub async fn run_retention(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let interval = self.config.retention_interval;
        let aggregator = Arc::clone(&self);
        run_every(interval, interval, shutdown, move || {
            let aggregator = Arc::clone(&aggregator);
            async move {
                if let Err(e) = aggregator.run_retention_at(Utc::now()).await {
                    tracing::warn!("Retention run failed: {}", e);
                }
            }
        })
        .await;
        tracing::debug!("Retention loop stopped");
    }
}

/// Call `job` after `delay` and then every `interval` until `shutdown`.
async fn run_every<F, Fut>(
    delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let start = tokio::time::Instant::now() + delay;
    let mut ticker = tokio::time::interval_at(start, interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }
        job().await;
    }
}
