//! Bounded in-memory window of recently seen event ids.
//!
//! The window answers "has any relay delivered this id recently?" and
//! remembers which relays did. It is a moka cache with an LRU policy, so the
//! least recently delivered ids are evicted once it is full; the store's
//! processed-id index catches anything evicted early.

use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;

/// Result of observing an event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First delivery of this id within the window.
    First,
    /// Already delivered; `new_observer` is false when the same relay repeats it.
    Repeat { new_observer: bool },
}

/// Relays that delivered one id, first deliverer first.
type Observers = Arc<Mutex<Vec<String>>>;

/// Thread-safe dedupe window.
pub struct DedupeWindow {
    ids: Cache<String, Observers>,
}

impl DedupeWindow {
    /// Create a window holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let ids = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { ids }
    }

    /// Record that `relay_url` delivered `event_id`.
    pub fn observe(&self, event_id: &str, relay_url: &str) -> Observation {
        let entry = self
            .ids
            .entry_by_ref(event_id)
            .or_insert_with(|| Arc::new(Mutex::new(vec![relay_url.to_string()])));
        if entry.is_fresh() {
            return Observation::First;
        }

        let observers = entry.into_value();
        let mut relays = observers.lock();
        if relays.iter().any(|r| r == relay_url) {
            return Observation::Repeat {
                new_observer: false,
            };
        }
        relays.push(relay_url.to_string());
        Observation::Repeat { new_observer: true }
    }

    /// Drop `event_id` so its next delivery counts as first.
    pub fn forget(&self, event_id: &str) {
        self.ids.invalidate(event_id);
    }

    /// Relays that delivered `event_id`, first deliverer first.
    pub fn observers(&self, event_id: &str) -> Option<Vec<String>> {
        self.ids.get(event_id).map(|relays| relays.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_then_repeat() {
        let window = DedupeWindow::new(10);
        assert_eq!(window.observe("e1", "wss://a"), Observation::First);
        assert_eq!(
            window.observe("e1", "wss://b"),
            Observation::Repeat { new_observer: true }
        );
        assert_eq!(
            window.observe("e1", "wss://b"),
            Observation::Repeat {
                new_observer: false
            }
        );
        assert_eq!(
            window.observers("e1").unwrap(),
            vec!["wss://a".to_string(), "wss://b".to_string()]
        );
    }

    #[test]
    fn test_capacity_bounds_window() {
        let window = DedupeWindow::new(10);
        for i in 0..100 {
            window.observe(&format!("e{i}"), "wss://a");
        }
        window.ids.run_pending_tasks();
        assert!(window.ids.entry_count() <= 10);

        let evicted = (0..100)
            .map(|i| format!("e{i}"))
            .find(|id| window.observers(id).is_none())
            .unwrap();
        assert_eq!(window.observe(&evicted, "wss://b"), Observation::First);
    }

    #[test]
    fn test_forget_resets_id() {
        let window = DedupeWindow::new(10);
        window.observe("e1", "wss://a");
        window.forget("e1");
        assert!(window.observers("e1").is_none());
        assert_eq!(window.observe("e1", "wss://b"), Observation::First);
        assert_eq!(window.observers("e1").unwrap(), vec!["wss://b".to_string()]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let window = DedupeWindow::new(0);
        assert_eq!(window.observe("e1", "wss://a"), Observation::First);
        assert_eq!(
            window.observe("e1", "wss://b"),
            Observation::Repeat { new_observer: true }
        );
    }
}
