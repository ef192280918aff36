//! Relay discovery from relay-list records (NIP-65).
//!
//! Two paths feed the crawler:
//! - Passive: every relay-list record flushed by the pipeline arrives on a
//!   channel; its URL tags are normalized and unseen relays inserted.
//! - Active: on a timer, recently active authors are sampled and their
//!   relay lists requested over a few open connections. Replies flow back
//!   through the pipeline and end up on the passive path.
//!
//! Discovery only ever adds relays. Newly inserted relays are connected after
//! a random delay so a burst of discoveries does not become a burst of dials.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};

use relaywatch_core::{NormalizeResult, RelayTier, Store, day_key, normalize_relay_url};

use crate::Result;
use crate::pipeline::RelayListTags;
use crate::relay::{Command, EnsureOutcome, Filter, Supervisor};

/// Tag names whose values carry relay URLs.
const URL_TAGS: [&str; 2] = ["r", "relay"];

/// Crawler configuration.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Upper bound of the random delay before dialing a new relay.
    pub jitter: Duration,
    /// Period of the active path. Zero disables it.
    pub active_interval: Duration,
    /// Delay before the first active round.
    pub active_initial_delay: Duration,
    /// Authors sampled per active round.
    pub sample_size: usize,
    /// Open connections used per active round.
    pub max_relays: usize,
    /// Authors per REQ.
    pub batch_size: usize,
    /// Discovery subscriptions are closed after this even without EOSE.
    pub query_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            jitter: Duration::from_secs(30),
            active_interval: Duration::from_secs(15 * 60),
            active_initial_delay: Duration::from_secs(120),
            sample_size: 500,
            max_relays: 10,
            batch_size: 100,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Relay discovery crawler.
pub struct Crawler {
    config: CrawlerConfig,
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
    discovered: AtomicU64,
    next_subscription: AtomicU64,
}

/// Raw URL candidates in a relay-list tag set.
///
/// Values of `r` and `relay` tags are split on whitespace, `,`, `;` and `|`
/// since some clients pack several URLs into one value.
pub fn extract_relay_urls(tags: &[Vec<String>]) -> Vec<String> {
    tags.iter()
        .filter(|tag| tag.first().is_some_and(|name| URL_TAGS.contains(&name.as_str())))
        .filter_map(|tag| tag.get(1))
        .flat_map(|value| value.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|')))
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
        .collect()
}

impl Crawler {
    pub fn new(config: CrawlerConfig, store: Arc<Store>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            config,
            store,
            supervisor,
            discovered: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Relays inserted by this crawler so far.
    pub fn discovered_count(&self) -> u64 {
        self.discovered.load(Ordering::Relaxed)
    }

    /// Insert every unseen relay named in `tags`. Returns the new canonical URLs.
    ///
    /// Blocking; call from `spawn_blocking` on a runtime.
    pub fn record_relay_list(&self, tags: &[Vec<String>]) -> Result<Vec<String>> {
        let mut inserted = Vec::new();
        for candidate in extract_relay_urls(tags) {
            let url = match normalize_relay_url(&candidate) {
                NormalizeResult::Ok(url) => url,
                NormalizeResult::Invalid(reason) | NormalizeResult::Blocked(reason) => {
                    tracing::trace!("Ignoring relay '{}': {}", candidate, reason);
                    continue;
                }
            };
            if inserted.contains(&url) {
                continue;
            }
            if self.store.insert_relay(&url, RelayTier::Discovered)? {
                tracing::info!(relay = %url, "Discovered relay");
                inserted.push(url);
            }
        }

        if !inserted.is_empty() {
            self.discovered
                .fetch_add(inserted.len() as u64, Ordering::Relaxed);
            counter!("relay_discovered_total").increment(inserted.len() as u64);
        }
        Ok(inserted)
    }

    /// Dial `url` after a random delay in `[0, jitter)`.
    fn schedule_connect(&self, url: String) {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let delay = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.ensure_connection(&url) == EnsureOutcome::AtCapacity {
                tracing::debug!(relay = %url, "Discovered relay waits for a free slot");
            }
        });
    }

    /// Consume relay lists until the channel closes or `shutdown` fires.
    pub async fn run_passive(
        self: Arc<Self>,
        mut relay_lists: mpsc::Receiver<RelayListTags>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let tags = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                tags = relay_lists.recv() => match tags {
                    Some(tags) => tags,
                    None => break,
                },
            };

            counter!("discovery_relay_lists_total").increment(1);
            let crawler = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || crawler.record_relay_list(&tags)).await {
                Ok(Ok(new_urls)) => {
                    for url in new_urls {
                        self.schedule_connect(url);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Failed to record relay list: {}", e),
                Err(e) => tracing::warn!("Relay list task failed: {}", e),
            }
        }
        tracing::debug!("Passive discovery stopped");
    }

    /// Run one active round. Returns the number of subscriptions sent.
    pub async fn active_round(&self) -> Result<usize> {
        let since = day_key((Utc::now() - chrono::Duration::hours(24)).date_naive());
        let store = Arc::clone(&self.store);
        let sample_size = self.config.sample_size;
        let authors =
            tokio::task::spawn_blocking(move || store.sample_active_authors(&since, sample_size))
                .await??;

        let mut relays = self.supervisor.open_relays();
        if authors.is_empty() || relays.is_empty() {
            tracing::debug!(
                authors = authors.len(),
                relays = relays.len(),
                "Skipping active discovery round"
            );
            return Ok(0);
        }
        relays.shuffle(&mut rand::thread_rng());
        relays.truncate(self.config.max_relays.max(1));

        let mut sent = 0;
        for relay in &relays {
            for chunk in authors.chunks(self.config.batch_size.max(1)) {
                let n = self.next_subscription.fetch_add(1, Ordering::Relaxed);
                let subscription = format!("relaywatch-discovery-{}", n);
                let command = Command::Subscribe {
                    subscription: subscription.clone(),
                    filters: vec![Filter::relay_lists(chunk.to_vec())],
                    one_shot: true,
                };
                if !self.supervisor.send_command(relay, command) {
                    tracing::debug!(relay = %relay, "Connection busy, skipping discovery query");
                    break;
                }
                sent += 1;
                self.close_after_timeout(relay.clone(), subscription);
            }
        }

        counter!("discovery_queries_total").increment(sent as u64);
        tracing::info!(
            authors = authors.len(),
            relays = relays.len(),
            subscriptions = sent,
            "Active discovery round"
        );
        Ok(sent)
    }

    /// Close a discovery subscription that never saw EOSE.
    fn close_after_timeout(&self, relay: String, subscription: String) {
        let supervisor = Arc::clone(&self.supervisor);
        let timeout = self.config.query_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            supervisor.send_command(&relay, Command::Close { subscription });
        });
    }

    /// Run active rounds on the configured schedule until `shutdown`.
    pub async fn run_active(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.config.active_interval.is_zero() {
            return;
        }

        let start = tokio::time::Instant::now() + self.config.active_initial_delay;
        let mut ticker = tokio::time::interval_at(start, self.config.active_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

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

            if let Err(e) = self.active_round().await {
                tracing::warn!("Active discovery round failed: {}", e);
            }
        }
        tracing::debug!("Active discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineConfig};
    use crate::relay::SupervisorConfig;

    fn tags(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn crawler() -> (Arc<Store>, Crawler) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            Arc::clone(&store),
            None,
        ));
        let supervisor = Arc::new(Supervisor::new(
            SupervisorConfig::default(),
            Arc::clone(&store),
            pipeline,
        ));
        let crawler = Crawler::new(CrawlerConfig::default(), Arc::clone(&store), supervisor);
        (store, crawler)
    }

    #[test]
    fn test_extract_relay_urls_splits_values() {
        let urls = extract_relay_urls(&tags(&[
            &["r", "wss://a.example.com", "read"],
            &["relay", "wss://b.example.com, wss://c.example.com"],
            &["r", "wss://d.example.com|wss://e.example.com;  wss://f.example.com"],
            &["p", "wss://ignored.example.com"],
            &["r"],
        ]));
        assert_eq!(
            urls,
            vec![
                "wss://a.example.com",
                "wss://b.example.com",
                "wss://c.example.com",
                "wss://d.example.com",
                "wss://e.example.com",
                "wss://f.example.com",
            ]
        );
    }

    #[test]
    fn test_one_new_one_known_in_different_case() {
        let (store, crawler) = crawler();
        store
            .insert_relay("wss://known.example.com", RelayTier::Seed)
            .unwrap();

        let new = crawler
            .record_relay_list(&tags(&[
                &["r", "wss://new.example.com"],
                &["r", "WSS://KNOWN.Example.com/"],
            ]))
            .unwrap();

        assert_eq!(new, vec!["wss://new.example.com".to_string()]);
        assert_eq!(store.relay_count().unwrap(), 2);
        assert_eq!(crawler.discovered_count(), 1);
    }

    #[test]
    fn test_equivalent_urls_create_one_record() {
        let (store, crawler) = crawler();
        let new = crawler
            .record_relay_list(&tags(&[
                &["r", "relay.example.com"],
                &["r", "wss://relay.example.com/"],
                &["relay", "WSS://Relay.Example.com"],
            ]))
            .unwrap();
        assert_eq!(new.len(), 1);

        let again = crawler
            .record_relay_list(&tags(&[&["r", "relay.example.com"]]))
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(store.relay_count().unwrap(), 1);
    }

    #[test]
    fn test_local_and_malformed_urls_discarded() {
        let (store, crawler) = crawler();
        let new = crawler
            .record_relay_list(&tags(&[
                &["r", "ws://localhost:7777"],
                &["r", "wss://192.168.0.10"],
                &["r", "https://web.example.com"],
                &["r", "wss://"],
            ]))
            .unwrap();
        assert!(new.is_empty());
        assert_eq!(store.relay_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_round_without_open_relays_is_noop() {
        let (_store, crawler) = crawler();
        assert_eq!(crawler.active_round().await.unwrap(), 0);
    }
}
