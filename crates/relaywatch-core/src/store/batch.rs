//! Transactional application of buffered events.

use std::collections::HashMap;

use rusqlite::Transaction;

use super::{Store, unix_now};
use crate::event::{RawEvent, day_key, event_day, kinds, unix_day};
use crate::extract::{extract_client, extract_profile, extract_zap_amount_sats};
use crate::url::relay_host;
use crate::Result;

/// An accepted event waiting to be flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEvent {
    /// Canonical URL of the relay that delivered the event first.
    pub relay_url: String,
    pub event: RawEvent,
    /// Unix time the event was received.
    pub received_at: i64,
}

/// A relay that delivered an already-seen event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayObservation {
    /// Attributed day of the event.
    pub day: String,
    pub author: String,
    pub relay_url: String,
}

/// Per-relay counters accumulated between flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCounters {
    /// Events already seen from another relay.
    pub duplicates: u64,
    /// Events rejected by validation.
    pub invalid: u64,
}

impl RelayCounters {
    pub fn is_empty(&self) -> bool {
        self.duplicates == 0 && self.invalid == 0
    }

    /// Add `other` into `self`.
    pub fn merge(&mut self, other: RelayCounters) {
        self.duplicates += other.duplicates;
        self.invalid += other.invalid;
    }
}

/// Everything one flush writes.
#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
    pub events: Vec<BufferedEvent>,
    /// Additional relays seen delivering events, for the active-user relay sets.
    pub observations: Vec<RelayObservation>,
    pub counters: HashMap<String, RelayCounters>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.observations.is_empty()
            && self.counters.values().all(RelayCounters::is_empty)
    }
}

/// Result of applying a [`FlushBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Events newly aggregated.
    pub applied: usize,
    /// Events skipped because their id was already processed.
    ///
    /// A skipped id has its last-seen day moved forward, so an id that keeps
    /// being delivered never ages out of the index.
    pub skipped: usize,
    /// Tag lists of applied relay-list events.
    pub relay_lists: Vec<Vec<Vec<String>>>,
}

impl Store {
    /// Apply a batch in one write transaction.
    ///
    /// Events whose id is already in the processed-id index are skipped, so
    /// re-applying a batch after a failed commit never double-counts. On any
    /// error the transaction rolls back and nothing is written.
    pub fn apply_batch(&self, batch: &FlushBatch) -> Result<FlushOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let outcome = apply_in_tx(&tx, batch)?;
        tx.commit()?;
        Ok(outcome)
    }
}

fn apply_in_tx(tx: &Transaction<'_>, batch: &FlushBatch) -> Result<FlushOutcome> {
    let now = unix_now();
    let mut outcome = FlushOutcome::default();
    let mut relay_events: HashMap<&str, u64> = HashMap::new();

    let mut mark_ingested =
        tx.prepare_cached("INSERT OR IGNORE INTO ingested_events (id, seen_day) VALUES (?, ?)")?;
    let mut touch_ingested = tx.prepare_cached(
        "UPDATE ingested_events SET seen_day = MAX(seen_day, ?2) WHERE id = ?1",
    )?;
    let mut insert_user_relay = tx.prepare_cached(
        "INSERT OR IGNORE INTO active_user_relays (day, author, relay_url) VALUES (?, ?, ?)",
    )?;
    let mut insert_author = tx.prepare_cached(
        "INSERT OR IGNORE INTO daily_authors (day, relay_url, kind, author) VALUES (?, ?, ?, ?)",
    )?;
    let mut upsert_aggregate = tx.prepare_cached(
        "INSERT INTO daily_aggregates (day, relay_url, kind, event_count, unique_authors, value_sum)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)
         ON CONFLICT(day, relay_url, kind) DO UPDATE SET
            event_count = event_count + 1,
            unique_authors = unique_authors + excluded.unique_authors,
            value_sum = value_sum + excluded.value_sum",
    )?;
    let mut upsert_user = tx.prepare_cached(
        "INSERT INTO active_user_days (day, author, event_count, profile) VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(day, author) DO UPDATE SET
            event_count = event_count + 1,
            profile = COALESCE(profile, excluded.profile)",
    )?;
    let mut upsert_client = tx.prepare_cached(
        "INSERT INTO clients (name, total_events, last_seen_at) VALUES (?1, 1, ?2)
         ON CONFLICT(name) DO UPDATE SET
            total_events = total_events + 1,
            last_seen_at = MAX(last_seen_at, excluded.last_seen_at)",
    )?;
    let mut upsert_client_day = tx.prepare_cached(
        "INSERT INTO client_daily (day, client, kind, event_count) VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(day, client, kind) DO UPDATE SET event_count = event_count + 1",
    )?;

    for buffered in &batch.events {
        let event = &buffered.event;
        let day = day_key(event_day(event.created_at, buffered.received_at));
        // Index age follows delivery, not created_at: old events are republished
        let seen_day = day_key(unix_day(buffered.received_at));

        if mark_ingested.execute(rusqlite::params![event.id, seen_day])? == 0 {
            touch_ingested.execute(rusqlite::params![event.id, seen_day])?;
            outcome.skipped += 1;
            continue;
        }

        let new_author = insert_author.execute(rusqlite::params![
            day,
            buffered.relay_url,
            event.kind,
            event.pubkey
        ])?;

        let value = if event.kind == kinds::ZAP_RECEIPT {
            extract_zap_amount_sats(event).unwrap_or(0)
        } else {
            0
        };
        upsert_aggregate.execute(rusqlite::params![
            day,
            buffered.relay_url,
            event.kind,
            new_author as i64,
            value as i64
        ])?;

        let profile = if event.kind == kinds::METADATA {
            extract_profile(&event.content).and_then(|p| serde_json::to_string(&p).ok())
        } else {
            None
        };
        upsert_user.execute(rusqlite::params![day, event.pubkey, profile])?;
        insert_user_relay.execute(rusqlite::params![day, event.pubkey, buffered.relay_url])?;

        if let Some(client) = extract_client(event) {
            upsert_client.execute(rusqlite::params![client, buffered.received_at.max(0)])?;
            upsert_client_day.execute(rusqlite::params![day, client, event.kind])?;
        }

        if event.kind == kinds::RELAY_LIST {
            outcome.relay_lists.push(event.tags.clone());
        }

        *relay_events.entry(buffered.relay_url.as_str()).or_default() += 1;
        outcome.applied += 1;
    }

    for observation in &batch.observations {
        insert_user_relay.execute(rusqlite::params![
            observation.day,
            observation.author,
            observation.relay_url
        ])?;
    }

    let mut upsert_relay = tx.prepare_cached(
        "INSERT INTO relays (url, host, first_seen_at, total_events, duplicate_events, invalid_events)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(url) DO UPDATE SET
            total_events = total_events + excluded.total_events,
            duplicate_events = duplicate_events + excluded.duplicate_events,
            invalid_events = invalid_events + excluded.invalid_events",
    )?;

    let mut per_relay: HashMap<&str, (u64, RelayCounters)> = HashMap::new();
    for (url, events) in relay_events {
        per_relay.entry(url).or_default().0 += events;
    }
    for (url, counters) in &batch.counters {
        per_relay.entry(url.as_str()).or_default().1.merge(*counters);
    }

    for (url, (events, counters)) in per_relay {
        if events == 0 && counters.is_empty() {
            continue;
        }
        upsert_relay.execute(rusqlite::params![
            url,
            relay_host(url),
            now,
            events as i64,
            counters.duplicates as i64,
            counters.invalid as i64
        ])?;
    }

    Ok(outcome)
}
