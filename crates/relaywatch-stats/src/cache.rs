//! In-memory snapshot caching with moka.
//!
//! Holds the latest [`StatisticsSnapshot`] per range. The aggregator inserts
//! a whole snapshot as one value after it is stored, so a reader sees either
//! the previous version or the new one. On a miss (TTL expiry, fresh
//! process) the latest stored version is loaded and cached.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use relaywatch_core::Store;

use crate::snapshot::StatisticsSnapshot;
use crate::{Error, Result, TimeRange};

/// Default TTL for cached snapshots.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Upper bound on a single cache or fallback read.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-through cache of the latest snapshot per range.
#[derive(Clone)]
pub struct SnapshotCache {
    cache: Cache<TimeRange, Arc<StatisticsSnapshot>>,
    store: Arc<Store>,
}

impl SnapshotCache {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(TimeRange::ALL.len() as u64)
            .time_to_live(ttl)
            .build();
        Self { cache, store }
    }

    /// Publish `snapshot` as the latest for its range.
    ///
    /// An older version never replaces a newer cached one.
    pub async fn insert(&self, snapshot: Arc<StatisticsSnapshot>) -> Result<()> {
        let range = snapshot.range;
        let publish = async {
            if let Some(current) = self.cache.get(&range).await {
                if current.version > snapshot.version {
                    tracing::debug!(%range, current = current.version, stale = snapshot.version, "Ignoring stale snapshot");
                    return;
                }
            }
            self.cache.insert(range, snapshot).await;
        };
        tokio::time::timeout(OPERATION_TIMEOUT, publish)
            .await
            .map_err(|_| Error::Timeout("cache insert"))
    }

    /// Latest snapshot for `range`, loading the newest stored version on a miss.
    pub async fn get_latest_snapshot(
        &self,
        range: TimeRange,
    ) -> Result<Option<Arc<StatisticsSnapshot>>> {
        if let Some(hit) = self.cache.get(&range).await {
            tracing::trace!(%range, version = hit.version, "cache hit");
            return Ok(Some(hit));
        }

        tracing::debug!(%range, "cache miss, loading from store");
        let store = Arc::clone(&self.store);
        let load = tokio::task::spawn_blocking(move || store.latest_snapshot(range.as_str()));
        let stored = tokio::time::timeout(OPERATION_TIMEOUT, load)
            .await
            .map_err(|_| Error::Timeout("snapshot load"))???;

        let Some(stored) = stored else {
            return Ok(None);
        };
        let snapshot = Arc::new(StatisticsSnapshot::from_stored(&stored)?);
        self.insert(Arc::clone(&snapshot)).await?;
        Ok(Some(snapshot))
    }

    /// Cached entry for `range`, without falling back to the store.
    pub async fn peek(&self, range: TimeRange) -> Option<Arc<StatisticsSnapshot>> {
        self.cache.get(&range).await
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
