//! SQLite schema for the aggregate store.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Creates all tables on a fresh database. An initialized database is left
/// as is.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        conn.execute_batch(TABLES)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version != SCHEMA_VERSION {
        tracing::warn!(
            found = current_version,
            expected = SCHEMA_VERSION,
            "Unexpected schema version"
        );
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

const TABLES: &str = r#"
    -- Relay registry, one row per canonical URL
    CREATE TABLE IF NOT EXISTS relays (
        url TEXT PRIMARY KEY,
        host TEXT NOT NULL,
        tier TEXT NOT NULL DEFAULT 'discovered',
        active INTEGER NOT NULL DEFAULT 0,
        first_seen_at INTEGER NOT NULL,
        connected_at INTEGER,
        disconnected_at INTEGER,
        latency_ms REAL,
        total_events INTEGER NOT NULL DEFAULT 0,
        duplicate_events INTEGER NOT NULL DEFAULT 0,
        invalid_events INTEGER NOT NULL DEFAULT 0,
        connection_attempts INTEGER NOT NULL DEFAULT 0,
        connection_successes INTEGER NOT NULL DEFAULT 0,
        health_score REAL NOT NULL DEFAULT 0,
        last_error TEXT,
        rank INTEGER
    );

    -- Per (day, relay, kind) counters
    CREATE TABLE IF NOT EXISTS daily_aggregates (
        day TEXT NOT NULL,
        relay_url TEXT NOT NULL,
        kind INTEGER NOT NULL,
        event_count INTEGER NOT NULL DEFAULT 0,
        unique_authors INTEGER NOT NULL DEFAULT 0,
        value_sum INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (day, relay_url, kind)
    );

    -- Side index backing exact unique-author counts
    CREATE TABLE IF NOT EXISTS daily_authors (
        day TEXT NOT NULL,
        relay_url TEXT NOT NULL,
        kind INTEGER NOT NULL,
        author TEXT NOT NULL,
        PRIMARY KEY (day, relay_url, kind, author)
    );

    CREATE TABLE IF NOT EXISTS active_user_days (
        day TEXT NOT NULL,
        author TEXT NOT NULL,
        event_count INTEGER NOT NULL DEFAULT 0,
        profile TEXT,
        PRIMARY KEY (day, author)
    );

    -- Every relay that delivered an author's events on a day, first or not
    CREATE TABLE IF NOT EXISTS active_user_relays (
        day TEXT NOT NULL,
        author TEXT NOT NULL,
        relay_url TEXT NOT NULL,
        PRIMARY KEY (day, author, relay_url)
    );

    CREATE TABLE IF NOT EXISTS clients (
        name TEXT PRIMARY KEY,
        total_events INTEGER NOT NULL DEFAULT 0,
        last_seen_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS client_daily (
        day TEXT NOT NULL,
        client TEXT NOT NULL,
        kind INTEGER NOT NULL,
        event_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (day, client, kind)
    );

    -- Durable processed-id index, aged by the UTC day the id was last delivered
    CREATE TABLE IF NOT EXISTS ingested_events (
        id TEXT PRIMARY KEY,
        seen_day TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS statistics_snapshots (
        range TEXT NOT NULL,
        version INTEGER NOT NULL,
        computed_at INTEGER NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY (range, version)
    );

    CREATE INDEX IF NOT EXISTS idx_daily_aggregates_relay ON daily_aggregates(relay_url, day);
    CREATE INDEX IF NOT EXISTS idx_daily_authors_author ON daily_authors(day, author);
    CREATE INDEX IF NOT EXISTS idx_ingested_events_seen ON ingested_events(seen_day);
    CREATE INDEX IF NOT EXISTS idx_snapshots_computed ON statistics_snapshots(computed_at);
"#;

/// Relay tier classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayTier {
    /// Loaded from the seed configuration.
    Seed,
    /// Found in a relay-list record.
    #[default]
    Discovered,
}

impl RelayTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Discovered => "discovered",
        }
    }
}

impl std::str::FromStr for RelayTier {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Self::Seed),
            "discovered" => Ok(Self::Discovered),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_init_schema_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "relays",
            "daily_aggregates",
            "daily_authors",
            "active_user_days",
            "active_user_relays",
            "clients",
            "client_daily",
            "ingested_events",
            "statistics_snapshots",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_reopen_keeps_data() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO relays (url, host, first_seen_at, rank) VALUES ('wss://a.example', 'a.example', 1, 3)",
            [],
        )
        .unwrap();

        init_schema(&conn).unwrap();
        let rank: i64 = conn
            .query_row("SELECT rank FROM relays", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rank, 3);
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_relay_tier_roundtrip() {
        use std::str::FromStr;
        assert_eq!(RelayTier::from_str(RelayTier::Seed.as_str()), Ok(RelayTier::Seed));
        assert_eq!(
            RelayTier::from_str(RelayTier::Discovered.as_str()),
            Ok(RelayTier::Discovered)
        );
        assert!(RelayTier::from_str("bogus").is_err());
    }
}
