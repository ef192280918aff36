//! SQLite-backed aggregate store.
//!
//! The `Store` is the single durable component shared by the ingest and
//! stats daemons. It holds:
//! - The relay registry (one row per canonical URL)
//! - Daily (day, relay, kind) aggregates plus their unique-author side index
//! - Active user days, client counters, and the processed-id index
//! - Versioned statistics snapshots
//!
//! All writes are idempotent upserts. Callers on async runtimes should invoke
//! store methods from `spawn_blocking`.

mod batch;
pub mod schema;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::extract::ProfileSnapshot;
use crate::url::{NormalizeResult, normalize_relay_url, relay_host};
use crate::Result;

pub use batch::{BufferedEvent, FlushBatch, FlushOutcome, RelayCounters, RelayObservation};
pub use schema::RelayTier;

/// Smoothing factor for the rolling latency estimate.
pub const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

/// A known relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRecord {
    pub url: String,
    pub host: String,
    pub tier: RelayTier,
    pub active: bool,
    pub first_seen_at: i64,
    pub connected_at: Option<i64>,
    pub disconnected_at: Option<i64>,
    /// Rolling handshake latency estimate.
    pub latency_ms: Option<f64>,
    pub total_events: u64,
    /// Events this relay delivered after another relay already had.
    pub duplicate_events: u64,
    pub invalid_events: u64,
    pub connection_attempts: u64,
    pub connection_successes: u64,
    pub health_score: f64,
    pub last_error: Option<String>,
    /// Position in the most recent 24h top-relay ranking.
    pub rank: Option<u32>,
}

/// Counters for one (day, relay, kind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyAggregate {
    pub day: String,
    pub relay_url: String,
    pub kind: u32,
    pub event_count: u64,
    pub unique_authors: u64,
    /// Sum of zap amounts in sats.
    pub value_sum: u64,
}

/// One author's activity on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUserDay {
    pub day: String,
    pub author: String,
    pub event_count: u64,
    /// Every relay that delivered this author's events that day, including
    /// relays that only delivered copies already seen elsewhere.
    pub relays: Vec<String>,
    pub profile: Option<ProfileSnapshot>,
}

/// Lifetime counters for a publishing client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub name: String,
    pub total_events: u64,
    pub last_seen_at: i64,
}

/// Inputs for a relay's health score.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayHealthInputs {
    pub url: String,
    pub connection_attempts: u64,
    pub connection_successes: u64,
    pub latency_ms: Option<f64>,
    /// Events attributed to the relay since the cutoff day.
    pub recent_events: u64,
}

/// A persisted statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub range: String,
    pub version: u64,
    pub computed_at: i64,
    /// Serialized snapshot body.
    pub payload: String,
}

/// Durable aggregate store.
pub struct Store {
    /// SQLite connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // WAL lets the stats daemon read while ingest writes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;
        schema::init_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Opened aggregate store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against the raw connection, for failure injection in tests.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    /// Run `f` inside one read transaction.
    ///
    /// Every query issued through the transaction observes the same database
    /// snapshot, so results computed together are mutually consistent.
    pub fn read_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Relay registry
    // ───────────────────────────────────────────────────────────────────────

    /// Insert a relay by canonical URL. Returns `true` if it was new.
    ///
    /// An existing discovered relay is promoted when inserted as a seed.
    pub fn insert_relay(&self, url: &str, tier: RelayTier) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relays (url, host, tier, first_seen_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![url, relay_host(url), tier.as_str(), unix_now()],
        )? == 1;

        if !inserted && tier == RelayTier::Seed {
            conn.execute(
                "UPDATE relays SET tier = ? WHERE url = ?",
                rusqlite::params![RelayTier::Seed.as_str(), url],
            )?;
        }

        Ok(inserted)
    }

    /// Normalize and register seed relays. Returns their canonical URLs.
    ///
    /// Invalid and blocked entries are skipped.
    pub fn register_seed_relays(&self, urls: &[String]) -> Result<Vec<String>> {
        let mut registered = Vec::with_capacity(urls.len());
        for raw in urls {
            match normalize_relay_url(raw) {
                NormalizeResult::Ok(url) => {
                    self.insert_relay(&url, RelayTier::Seed)?;
                    if !registered.contains(&url) {
                        registered.push(url);
                    }
                }
                NormalizeResult::Invalid(reason) | NormalizeResult::Blocked(reason) => {
                    tracing::debug!("Skipping seed relay '{}': {}", raw, reason);
                }
            }
        }
        Ok(registered)
    }

    /// All known relay URLs, seeds first, then by health score.
    pub fn list_relay_urls(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT url FROM relays
             ORDER BY CASE tier WHEN 'seed' THEN 0 ELSE 1 END, health_score DESC, url",
        )?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
    }

    /// Number of known relays.
    pub fn relay_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM relays", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Fetch a relay by canonical URL.
    pub fn get_relay(&self, url: &str) -> Result<Option<RelayRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT url, host, tier, active, first_seen_at, connected_at, disconnected_at,
                        latency_ms, total_events, duplicate_events, invalid_events,
                        connection_attempts, connection_successes, health_score, last_error, rank
                 FROM relays WHERE url = ?",
                [url],
                relay_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Count a connection attempt.
    pub fn record_connection_attempt(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE relays SET connection_attempts = connection_attempts + 1 WHERE url = ?",
            [url],
        )?;
        Ok(())
    }

    /// Mark a relay connected and fold `latency_ms` into its rolling estimate.
    pub fn record_connected(&self, url: &str, latency_ms: f64, at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE relays SET
                active = 1,
                connected_at = ?2,
                connection_successes = connection_successes + 1,
                latency_ms = CASE WHEN latency_ms IS NULL THEN ?3
                                  ELSE latency_ms * (1.0 - ?4) + ?3 * ?4 END,
                last_error = NULL
             WHERE url = ?1",
            rusqlite::params![url, at, latency_ms, LATENCY_EWMA_ALPHA],
        )?;
        Ok(())
    }

    /// Mark a relay disconnected, keeping the error that caused it if any.
    pub fn record_disconnected(&self, url: &str, at: i64, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE relays SET active = 0, disconnected_at = ?2,
                last_error = COALESCE(?3, last_error)
             WHERE url = ?1",
            rusqlite::params![url, at, error],
        )?;
        Ok(())
    }

    /// Clear every active flag (process start and stop).
    pub fn mark_all_inactive(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute("UPDATE relays SET active = 0 WHERE active = 1", [])?)
    }

    /// Inputs for health scoring, with event volume counted from `since_day`.
    pub fn relay_health_inputs(&self, since_day: &str) -> Result<Vec<RelayHealthInputs>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT r.url, r.connection_attempts, r.connection_successes, r.latency_ms,
                    COALESCE(d.events, 0)
             FROM relays r
             LEFT JOIN (
                SELECT relay_url, SUM(event_count) AS events
                FROM daily_aggregates WHERE day >= ?
                GROUP BY relay_url
             ) d ON d.relay_url = r.url",
        )?;
        let rows = stmt
            .query_map([since_day], |row| {
                Ok(RelayHealthInputs {
                    url: row.get(0)?,
                    connection_attempts: row.get::<_, i64>(1)? as u64,
                    connection_successes: row.get::<_, i64>(2)? as u64,
                    latency_ms: row.get(3)?,
                    recent_events: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Persist health scores.
    pub fn update_health_scores(&self, scores: &[(String, f64)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("UPDATE relays SET health_score = ? WHERE url = ?")?;
            for (url, score) in scores {
                stmt.execute(rusqlite::params![score, url])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace all relay ranks with `ranks` (1-based).
    pub fn record_relay_ranks(&self, ranks: &[(String, u32)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE relays SET rank = NULL WHERE rank IS NOT NULL", [])?;
        {
            let mut stmt = tx.prepare_cached("UPDATE relays SET rank = ? WHERE url = ?")?;
            for (url, rank) in ranks {
                stmt.execute(rusqlite::params![rank, url])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Aggregates
    // ───────────────────────────────────────────────────────────────────────

    /// Whether an event id is in the processed-id index.
    pub fn is_ingested(&self, event_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row("SELECT 1 FROM ingested_events WHERE id = ?", [event_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Fetch one daily aggregate row.
    pub fn daily_aggregate(
        &self,
        day: &str,
        relay_url: &str,
        kind: u32,
    ) -> Result<Option<DailyAggregate>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT day, relay_url, kind, event_count, unique_authors, value_sum
                 FROM daily_aggregates WHERE day = ? AND relay_url = ? AND kind = ?",
                rusqlite::params![day, relay_url, kind],
                |row| {
                    Ok(DailyAggregate {
                        day: row.get(0)?,
                        relay_url: row.get(1)?,
                        kind: row.get(2)?,
                        event_count: row.get::<_, i64>(3)? as u64,
                        unique_authors: row.get::<_, i64>(4)? as u64,
                        value_sum: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Total events across every daily aggregate row.
    pub fn total_event_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COALESCE(SUM(event_count), 0) FROM daily_aggregates",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Fetch an author's activity for a day.
    pub fn active_user_day(&self, day: &str, author: &str) -> Result<Option<ActiveUserDay>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT event_count, profile FROM active_user_days WHERE day = ? AND author = ?",
                [day, author],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((event_count, profile)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT relay_url FROM active_user_relays
             WHERE day = ? AND author = ? ORDER BY relay_url",
        )?;
        let relays = stmt
            .query_map([day, author], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(ActiveUserDay {
            day: day.to_string(),
            author: author.to_string(),
            event_count: event_count as u64,
            relays,
            profile: profile.and_then(|p| serde_json::from_str(&p).ok()),
        }))
    }

    /// Fetch a client record.
    pub fn client(&self, name: &str) -> Result<Option<ClientRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT name, total_events, last_seen_at FROM clients WHERE name = ?",
                [name],
                |row| {
                    Ok(ClientRecord {
                        name: row.get(0)?,
                        total_events: row.get::<_, i64>(1)? as u64,
                        last_seen_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Up to `limit` distinct authors active since `since_day`, in random order.
    pub fn sample_active_authors(&self, since_day: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT author FROM (SELECT DISTINCT author FROM active_user_days WHERE day >= ?)
             ORDER BY RANDOM() LIMIT ?",
        )?;
        let authors = stmt
            .query_map(rusqlite::params![since_day, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(authors)
    }

    /// Delete side-index rows older than `before_day`.
    ///
    /// Author rows age by event day, processed ids by the day they were last
    /// delivered. Aggregate counters and active-user relay sets are
    /// untouched. Returns the number of rows removed.
    pub fn prune_indexes(&self, before_day: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let authors = tx.execute("DELETE FROM daily_authors WHERE day < ?", [before_day])?;
        let ids = tx.execute("DELETE FROM ingested_events WHERE seen_day < ?", [before_day])?;
        tx.commit()?;
        Ok(authors + ids)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Snapshots
    // ───────────────────────────────────────────────────────────────────────

    /// Store a new snapshot version for `range`. Returns the version.
    pub fn insert_snapshot(&self, range: &str, computed_at: i64, payload: &str) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM statistics_snapshots WHERE range = ?",
            [range],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO statistics_snapshots (range, version, computed_at, payload)
             VALUES (?, ?, ?, ?)",
            rusqlite::params![range, version, computed_at, payload],
        )?;
        tx.commit()?;
        Ok(version as u64)
    }

    /// Newest snapshot for `range`.
    pub fn latest_snapshot(&self, range: &str) -> Result<Option<StoredSnapshot>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT range, version, computed_at, payload FROM statistics_snapshots
                 WHERE range = ? ORDER BY version DESC LIMIT 1",
                [range],
                |row| {
                    Ok(StoredSnapshot {
                        range: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                        computed_at: row.get(2)?,
                        payload: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Delete snapshots computed before `older_than`, keeping the newest per range.
    pub fn prune_snapshots(&self, older_than: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM statistics_snapshots
             WHERE computed_at < ?1
               AND version < (SELECT MAX(s.version) FROM statistics_snapshots s
                              WHERE s.range = statistics_snapshots.range)",
            [older_than],
        )?;
        Ok(removed)
    }
}

fn relay_from_row(row: &Row<'_>) -> rusqlite::Result<RelayRecord> {
    let tier: String = row.get(2)?;
    Ok(RelayRecord {
        url: row.get(0)?,
        host: row.get(1)?,
        tier: tier.parse().unwrap_or_default(),
        active: row.get::<_, i64>(3)? != 0,
        first_seen_at: row.get(4)?,
        connected_at: row.get(5)?,
        disconnected_at: row.get(6)?,
        latency_ms: row.get(7)?,
        total_events: row.get::<_, i64>(8)? as u64,
        duplicate_events: row.get::<_, i64>(9)? as u64,
        invalid_events: row.get::<_, i64>(10)? as u64,
        connection_attempts: row.get::<_, i64>(11)? as u64,
        connection_successes: row.get::<_, i64>(12)? as u64,
        health_score: row.get(13)?,
        last_error: row.get(14)?,
        rank: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "wss://relay.example.com";

    #[test]
    fn test_insert_relay_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_relay(URL, RelayTier::Discovered).unwrap());
        assert!(!store.insert_relay(URL, RelayTier::Discovered).unwrap());
        assert_eq!(store.relay_count().unwrap(), 1);

        let relay = store.get_relay(URL).unwrap().unwrap();
        assert_eq!(relay.host, "relay.example.com");
        assert_eq!(relay.tier, RelayTier::Discovered);
        assert!(!relay.active);
    }

    #[test]
    fn test_seed_promotes_discovered() {
        let store = Store::open_in_memory().unwrap();
        store.insert_relay(URL, RelayTier::Discovered).unwrap();
        store.insert_relay(URL, RelayTier::Seed).unwrap();
        assert_eq!(store.get_relay(URL).unwrap().unwrap().tier, RelayTier::Seed);
    }

    #[test]
    fn test_register_seed_relays_normalizes() {
        let store = Store::open_in_memory().unwrap();
        let seeds = vec![
            "relay.example.com".to_string(),
            "WSS://Relay.Example.com/".to_string(),
            "ws://127.0.0.1:7777".to_string(),
            "https://nope.example".to_string(),
            "nos.lol".to_string(),
        ];
        let registered = store.register_seed_relays(&seeds).unwrap();
        assert_eq!(registered, vec![URL.to_string(), "wss://nos.lol".to_string()]);
        assert_eq!(store.relay_count().unwrap(), 2);
    }

    #[test]
    fn test_connection_lifecycle_and_latency_ewma() {
        let store = Store::open_in_memory().unwrap();
        store.insert_relay(URL, RelayTier::Seed).unwrap();

        store.record_connection_attempt(URL).unwrap();
        store.record_connected(URL, 100.0, 1_000).unwrap();
        let relay = store.get_relay(URL).unwrap().unwrap();
        assert!(relay.active);
        assert_eq!(relay.latency_ms, Some(100.0));
        assert_eq!(relay.connected_at, Some(1_000));

        store.record_disconnected(URL, 2_000, Some("reset")).unwrap();
        store.record_connection_attempt(URL).unwrap();
        store.record_connected(URL, 200.0, 3_000).unwrap();

        let relay = store.get_relay(URL).unwrap().unwrap();
        assert_eq!(relay.connection_attempts, 2);
        assert_eq!(relay.connection_successes, 2);
        assert!((relay.latency_ms.unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(relay.disconnected_at, Some(2_000));
        assert_eq!(relay.last_error, None);
    }

    #[test]
    fn test_disconnect_keeps_error() {
        let store = Store::open_in_memory().unwrap();
        store.insert_relay(URL, RelayTier::Seed).unwrap();
        store.record_disconnected(URL, 10, Some("handshake timed out")).unwrap();
        store.record_disconnected(URL, 20, None).unwrap();
        let relay = store.get_relay(URL).unwrap().unwrap();
        assert_eq!(relay.last_error.as_deref(), Some("handshake timed out"));
        assert_eq!(relay.disconnected_at, Some(20));
    }

    #[test]
    fn test_relay_ranks_replace_previous() {
        let store = Store::open_in_memory().unwrap();
        store.insert_relay(URL, RelayTier::Seed).unwrap();
        store.insert_relay("wss://nos.lol", RelayTier::Seed).unwrap();

        store
            .record_relay_ranks(&[(URL.to_string(), 1), ("wss://nos.lol".to_string(), 2)])
            .unwrap();
        store.record_relay_ranks(&[("wss://nos.lol".to_string(), 1)]).unwrap();

        assert_eq!(store.get_relay(URL).unwrap().unwrap().rank, None);
        assert_eq!(store.get_relay("wss://nos.lol").unwrap().unwrap().rank, Some(1));
    }

    #[test]
    fn test_snapshot_versions_and_prune() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.insert_snapshot("24h", 100, "{\"a\":1}").unwrap(), 1);
        assert_eq!(store.insert_snapshot("24h", 200, "{\"a\":2}").unwrap(), 2);
        assert_eq!(store.insert_snapshot("7d", 100, "{}").unwrap(), 1);

        let latest = store.latest_snapshot("24h").unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.payload, "{\"a\":2}");

        // Everything is old, but the newest per range survives
        assert_eq!(store.prune_snapshots(1_000).unwrap(), 1);
        assert_eq!(store.latest_snapshot("24h").unwrap().unwrap().version, 2);
        assert_eq!(store.latest_snapshot("7d").unwrap().unwrap().version, 1);
        assert!(store.latest_snapshot("30d").unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relaywatch.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_relay(URL, RelayTier::Seed).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.list_relay_urls().unwrap(), vec![URL.to_string()]);
    }

    #[test]
    fn test_list_relay_urls_seeds_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert_relay("wss://a.example.com", RelayTier::Discovered).unwrap();
        store.insert_relay("wss://z.example.com", RelayTier::Seed).unwrap();
        assert_eq!(
            store.list_relay_urls().unwrap(),
            vec!["wss://z.example.com".to_string(), "wss://a.example.com".to_string()]
        );
    }
}
