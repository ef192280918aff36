//! Event ingestion pipeline.
//!
//! ```text
//! connection tasks ──ingest()──► validate ──► DedupeWindow ──► buffer
//!                                   │              │             │
//!                              invalid count   duplicate     flush task
//!                                                count          │
//!                                                               ▼
//!                                       Store::apply_batch (one transaction)
//!                                                               │
//!                                                  relay lists ─┴─► crawler
//! ```
//!
//! `ingest` never blocks on I/O. The flush task drains the buffer on a timer
//! or as soon as `batch_size` events are waiting. A failed flush puts the
//! whole batch back at the head of the buffer; the store's processed-id index
//! makes the retry safe. Once `max_buffered` events are waiting, new events
//! are dropped until a flush succeeds.

mod dedupe;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};

use relaywatch_core::{
    BufferedEvent, FlushBatch, FlushOutcome, RawEvent, RelayCounters, RelayObservation, Store,
    day_key, event_day, unix_now,
};

use crate::Result;

pub use dedupe::{DedupeWindow, Observation};

/// Tags of one relay-list record, handed to discovery.
pub type RelayListTags = Vec<Vec<String>>;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Buffered events that trigger an early flush.
    pub batch_size: usize,
    /// Flush timer period.
    pub flush_interval: Duration,
    /// Event ids remembered by the dedupe window.
    pub dedupe_capacity: usize,
    /// Buffered events beyond which new events are dropped.
    pub max_buffered: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            flush_interval: Duration::from_secs(2),
            dedupe_capacity: 200_000,
            max_buffered: 100_000,
        }
    }
}

/// What happened to one ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New event, buffered for the next flush.
    Accepted,
    /// Already delivered by some relay.
    Duplicate,
    /// Failed structural validation.
    Invalid,
    /// New, but the buffer was full.
    Dropped,
}

#[derive(Default)]
struct PipelineCounters {
    received: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    invalid: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
}

/// Point-in-time pipeline totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub invalid: u64,
    /// New events lost to a full buffer.
    pub dropped: u64,
    /// Events aggregated by successful flushes.
    pub flushed: u64,
    pub flush_failures: u64,
}

/// Validates, deduplicates, buffers and flushes events.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<Store>,
    dedupe: DedupeWindow,
    buffer: Mutex<VecDeque<BufferedEvent>>,
    observations: Mutex<Vec<RelayObservation>>,
    relay_counters: Mutex<HashMap<String, RelayCounters>>,
    /// Serializes flushes; only the holder drains the buffer.
    flush_lock: tokio::sync::Mutex<()>,
    flush_notify: Notify,
    relay_lists: Option<mpsc::Sender<RelayListTags>>,
    counters: PipelineCounters,
}

impl Pipeline {
    /// Create a pipeline writing to `store`.
    ///
    /// Relay-list tags are offered to `relay_lists` after each commit.
    pub fn new(
        config: PipelineConfig,
        store: Arc<Store>,
        relay_lists: Option<mpsc::Sender<RelayListTags>>,
    ) -> Self {
        let dedupe = DedupeWindow::new(config.dedupe_capacity);
        Self {
            config,
            store,
            dedupe,
            buffer: Mutex::new(VecDeque::new()),
            observations: Mutex::new(Vec::new()),
            relay_counters: Mutex::new(HashMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_notify: Notify::new(),
            relay_lists,
            counters: PipelineCounters::default(),
        }
    }

    /// Accept one event delivered by `relay_url`.
    pub fn ingest(&self, relay_url: &str, event: &Value) -> IngestOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        counter!("ingest_events_total").increment(1);

        let event = match RawEvent::from_value(event) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(relay = %relay_url, "Dropping invalid event: {}", e);
                self.counters.invalid.fetch_add(1, Ordering::Relaxed);
                counter!("ingest_events_invalid_total").increment(1);
                self.bump_counters(relay_url, |c| c.invalid += 1);
                return IngestOutcome::Invalid;
            }
        };

        let received_at = unix_now();
        if let Observation::Repeat { new_observer } = self.dedupe.observe(&event.id, relay_url) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            counter!("ingest_events_duplicate_total").increment(1);
            self.bump_counters(relay_url, |c| c.duplicates += 1);
            if new_observer {
                self.record_observation(relay_url, &event, received_at);
            }
            return IngestOutcome::Duplicate;
        }

        let len = {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.config.max_buffered {
                drop(buffer);
                // Let a later delivery of this id through once there is room
                self.dedupe.forget(&event.id);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("ingest_events_dropped_total").increment(1);
                tracing::debug!(relay = %relay_url, "Ingest buffer full, dropping event");
                return IngestOutcome::Dropped;
            }
            buffer.push_back(BufferedEvent {
                relay_url: relay_url.to_string(),
                event,
                received_at,
            });
            buffer.len()
        };
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        if len >= self.config.batch_size {
            self.flush_notify.notify_one();
        }

        IngestOutcome::Accepted
    }

    fn record_observation(&self, relay_url: &str, event: &RawEvent, received_at: i64) {
        let mut observations = self.observations.lock();
        if observations.len() >= self.config.max_buffered {
            return;
        }
        observations.push(RelayObservation {
            day: day_key(event_day(event.created_at, received_at)),
            author: event.pubkey.clone(),
            relay_url: relay_url.to_string(),
        });
    }

    fn bump_counters(&self, relay_url: &str, f: impl FnOnce(&mut RelayCounters)) {
        let mut counters = self.relay_counters.lock();
        f(counters.entry(relay_url.to_string()).or_default());
    }

    /// Relays that delivered `event_id` while it was in the dedupe window.
    pub fn observers(&self, event_id: &str) -> Option<Vec<String>> {
        self.dedupe.observers(event_id)
    }

    /// Events waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            invalid: self.counters.invalid.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
        }
    }

    fn take_batch(&self) -> FlushBatch {
        let events: Vec<BufferedEvent> = self.buffer.lock().drain(..).collect();
        let observations = std::mem::take(&mut *self.observations.lock());
        let counters = std::mem::take(&mut *self.relay_counters.lock());
        FlushBatch {
            events,
            observations,
            counters,
        }
    }

    /// Put a failed batch back ahead of anything buffered since.
    fn requeue(&self, batch: FlushBatch) {
        {
            let mut buffer = self.buffer.lock();
            for event in batch.events.into_iter().rev() {
                buffer.push_front(event);
            }
        }
        {
            let mut observations = self.observations.lock();
            let newer = std::mem::replace(&mut *observations, batch.observations);
            observations.extend(newer);
        }
        let mut counters = self.relay_counters.lock();
        for (url, restored) in batch.counters {
            counters.entry(url).or_default().merge(restored);
        }
    }

    /// Flush everything buffered right now.
    ///
    /// On error the batch is back in the buffer when this returns.
    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        let _guard = self.flush_lock.lock().await;

        let batch = self.take_batch();
        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let started = Instant::now();
        let event_count = batch.events.len();
        let store = Arc::clone(&self.store);
        let (batch, result) = tokio::task::spawn_blocking(move || {
            let result = store.apply_batch(&batch);
            (batch, result)
        })
        .await?;

        match result {
            Ok(outcome) => {
                histogram!("ingest_flush_duration_seconds").record(started.elapsed().as_secs_f64());
                counter!("ingest_flushes_total").increment(1);
                counter!("ingest_events_flushed_total").increment(outcome.applied as u64);
                self.counters
                    .flushed
                    .fetch_add(outcome.applied as u64, Ordering::Relaxed);
                tracing::debug!(
                    events = event_count,
                    applied = outcome.applied,
                    skipped = outcome.skipped,
                    "Flushed batch"
                );
                self.forward_relay_lists(&outcome);
                gauge!("ingest_buffer_len").set(self.buffered_len() as f64);
                Ok(outcome)
            }
            Err(e) => {
                self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                counter!("ingest_flush_failures_total").increment(1);
                tracing::error!(events = event_count, "Flush failed, requeueing batch: {}", e);
                self.requeue(batch);
                Err(e.into())
            }
        }
    }

    fn forward_relay_lists(&self, outcome: &FlushOutcome) {
        let Some(tx) = &self.relay_lists else {
            return;
        };
        for tags in &outcome.relay_lists {
            if let Err(e) = tx.try_send(tags.clone()) {
                counter!("discovery_relay_lists_dropped_total").increment(1);
                tracing::debug!("Relay list not handed to discovery: {}", e);
            }
        }
    }

    /// Flush on a timer, or early when the buffer reaches `batch_size`.
    ///
    /// Returns when `shutdown` flips to true or its sender is dropped; the
    /// caller is expected to `flush_now` once more afterwards.
    pub async fn run_flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = self.flush_notify.notified() => {}
            }

            if let Err(e) = self.flush_now().await {
                tracing::warn!("Flush will be retried: {}", e);
            }
        }

        tracing::debug!("Flush loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RELAY_A: &str = "wss://a.example.com";
    const RELAY_B: &str = "wss://b.example.com";
    const RELAY_C: &str = "wss://c.example.com";

    fn event_json(id: char, kind: u32, tags: Value) -> Value {
        json!({
            "id": id.to_string().repeat(64),
            "pubkey": "e".repeat(64),
            "created_at": 1_758_468_146u64,
            "kind": kind,
            "tags": tags,
            "content": "",
            "sig": "f".repeat(128),
        })
    }

    fn pipeline(config: PipelineConfig) -> (Arc<Store>, Arc<Pipeline>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let pipeline = Arc::new(Pipeline::new(config, Arc::clone(&store), None));
        (store, pipeline)
    }

    #[tokio::test]
    async fn test_same_event_from_three_relays_counts_once() {
        let (store, pipeline) = pipeline(PipelineConfig::default());
        let event = event_json('1', 1, json!([]));

        assert_eq!(pipeline.ingest(RELAY_A, &event), IngestOutcome::Accepted);
        assert_eq!(pipeline.ingest(RELAY_B, &event), IngestOutcome::Duplicate);
        assert_eq!(pipeline.ingest(RELAY_C, &event), IngestOutcome::Duplicate);

        let outcome = pipeline.flush_now().await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(store.total_event_count().unwrap(), 1);

        let observers = pipeline.observers(&"1".repeat(64)).unwrap();
        assert_eq!(observers, vec![RELAY_A, RELAY_B, RELAY_C]);

        assert_eq!(store.get_relay(RELAY_A).unwrap().unwrap().total_events, 1);
        assert_eq!(store.get_relay(RELAY_B).unwrap().unwrap().duplicate_events, 1);
        assert_eq!(store.get_relay(RELAY_C).unwrap().unwrap().duplicate_events, 1);

        // Every observer lands in the author's relay set, repeats only once
        assert_eq!(pipeline.ingest(RELAY_B, &event), IngestOutcome::Duplicate);
        pipeline.flush_now().await.unwrap();
        let user = store.active_user_day("2025-09-21", &"e".repeat(64)).unwrap().unwrap();
        assert_eq!(user.event_count, 1);
        assert_eq!(user.relays, vec![RELAY_A, RELAY_B, RELAY_C]);
    }

    #[tokio::test]
    async fn test_invalid_events_counted_per_relay() {
        let (store, pipeline) = pipeline(PipelineConfig::default());
        let mut bad = event_json('1', 1, json!([]));
        bad.as_object_mut().unwrap().remove("sig");

        assert_eq!(pipeline.ingest(RELAY_A, &bad), IngestOutcome::Invalid);
        assert_eq!(pipeline.ingest(RELAY_A, &json!("garbage")), IngestOutcome::Invalid);
        assert_eq!(pipeline.buffered_len(), 0);

        pipeline.flush_now().await.unwrap();
        let relay = store.get_relay(RELAY_A).unwrap().unwrap();
        assert_eq!(relay.invalid_events, 2);
        assert_eq!(relay.total_events, 0);
        assert_eq!(pipeline.stats().invalid, 2);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_without_double_count() {
        let (store, pipeline) = pipeline(PipelineConfig::default());
        store
            .with_conn(|c| {
                c.execute_batch(
                    "CREATE TRIGGER fail_users BEFORE INSERT ON active_user_days
                     BEGIN SELECT RAISE(ABORT, 'injected'); END;",
                )
            })
            .unwrap();

        pipeline.ingest(RELAY_A, &event_json('1', 1, json!([])));
        pipeline.ingest(RELAY_B, &event_json('1', 1, json!([])));
        pipeline.ingest(RELAY_A, &event_json('2', 1, json!([])));

        assert!(pipeline.flush_now().await.is_err());
        assert_eq!(pipeline.buffered_len(), 2);
        assert_eq!(store.total_event_count().unwrap(), 0);
        assert_eq!(pipeline.stats().flush_failures, 1);

        // Arrives between the failure and the retry
        pipeline.ingest(RELAY_C, &event_json('3', 1, json!([])));

        store
            .with_conn(|c| c.execute_batch("DROP TRIGGER fail_users;"))
            .unwrap();
        let outcome = pipeline.flush_now().await.unwrap();
        assert_eq!(outcome.applied, 3);
        assert_eq!(store.total_event_count().unwrap(), 3);
        assert_eq!(store.get_relay(RELAY_B).unwrap().unwrap().duplicate_events, 1);

        // A second retry of the same events is a no-op
        assert_eq!(pipeline.flush_now().await.unwrap(), FlushOutcome::default());
        assert_eq!(store.total_event_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_relay_lists_forwarded_after_commit() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, mut rx) = mpsc::channel(1);
        let pipeline = Pipeline::new(PipelineConfig::default(), store, Some(tx));

        pipeline.ingest(RELAY_A, &event_json('1', 10002, json!([["r", "wss://x.example.com"]])));
        pipeline.ingest(RELAY_A, &event_json('2', 10002, json!([["r", "wss://y.example.com"]])));
        pipeline.flush_now().await.unwrap();

        let tags = rx.try_recv().unwrap();
        assert_eq!(tags[0][0], "r");
        // Channel holds one; the second is dropped rather than blocking
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_size_triggers_early_flush() {
        let config = PipelineConfig {
            batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (store, pipeline) = pipeline(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&pipeline).run_flush_loop(shutdown_rx));

        // Let the first immediate tick pass
        tokio::time::sleep(Duration::from_millis(50)).await;

        pipeline.ingest(RELAY_A, &event_json('1', 1, json!([])));
        pipeline.ingest(RELAY_A, &event_json('2', 1, json!([])));

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.total_event_count().unwrap() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.total_event_count().unwrap(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (_store, pipeline) = pipeline(PipelineConfig::default());
        assert_eq!(pipeline.flush_now().await.unwrap(), FlushOutcome::default());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_new_events() {
        let config = PipelineConfig {
            max_buffered: 2,
            ..Default::default()
        };
        let (store, pipeline) = pipeline(config);
        store
            .with_conn(|c| {
                c.execute_batch(
                    "CREATE TRIGGER fail_users BEFORE INSERT ON active_user_days
                     BEGIN SELECT RAISE(ABORT, 'injected'); END;",
                )
            })
            .unwrap();

        assert_eq!(pipeline.ingest(RELAY_A, &event_json('1', 1, json!([]))), IngestOutcome::Accepted);
        assert_eq!(pipeline.ingest(RELAY_A, &event_json('2', 1, json!([]))), IngestOutcome::Accepted);
        assert!(pipeline.flush_now().await.is_err());

        // The requeued batch fills the buffer
        assert_eq!(pipeline.buffered_len(), 2);
        assert_eq!(pipeline.ingest(RELAY_A, &event_json('3', 1, json!([]))), IngestOutcome::Dropped);
        assert_eq!(pipeline.buffered_len(), 2);
        assert_eq!(pipeline.stats().dropped, 1);
        assert_eq!(pipeline.stats().accepted, 2);

        store
            .with_conn(|c| c.execute_batch("DROP TRIGGER fail_users;"))
            .unwrap();
        assert_eq!(pipeline.flush_now().await.unwrap().applied, 2);

        // The dropped id was not remembered, so a later copy is accepted
        assert_eq!(pipeline.ingest(RELAY_B, &event_json('3', 1, json!([]))), IngestOutcome::Accepted);
        pipeline.flush_now().await.unwrap();
        assert_eq!(store.total_event_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_old_event_not_recounted_after_restart_and_prune() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut old = event_json('1', 10002, json!([["r", "wss://x.example.com"]]));
        old["created_at"] = json!(unix_now() as u64 - 200 * 86_400);

        let first = Pipeline::new(PipelineConfig::default(), Arc::clone(&store), None);
        first.ingest(RELAY_A, &old);
        first.flush_now().await.unwrap();

        let horizon = day_key(relaywatch_core::unix_day(unix_now() - 90 * 86_400));
        store.prune_indexes(&horizon).unwrap();

        // A fresh window knows nothing; the store index still does
        let second = Pipeline::new(PipelineConfig::default(), Arc::clone(&store), None);
        assert_eq!(second.ingest(RELAY_B, &old), IngestOutcome::Accepted);
        let outcome = second.flush_now().await.unwrap();
        assert_eq!((outcome.applied, outcome.skipped), (0, 1));
        assert!(outcome.relay_lists.is_empty());
        assert_eq!(store.total_event_count().unwrap(), 1);
    }
}
