//! Owns one connection task per relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::watch;

use relaywatch_core::Store;

use super::connection::{
    Command, ConnectionHandle, ConnectionSettings, ConnectionState, spawn_connection,
};
use crate::Result;
use crate::pipeline::Pipeline;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub connection: ConnectionSettings,
    /// How often the relay table is re-read for new targets.
    pub reconcile_interval: Duration,
    /// Hard cap on connection tasks.
    pub max_connections: usize,
    /// Per-connection command queue length.
    pub command_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            reconcile_interval: Duration::from_secs(60),
            max_connections: 500,
            command_buffer: 64,
        }
    }
}

/// Result of [`Supervisor::ensure_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A new task was started.
    Spawned,
    /// A live task already exists for this URL.
    AlreadyRunning,
    /// `max_connections` tasks are already running.
    AtCapacity,
    /// The supervisor is shutting down.
    NotAccepting,
}

/// Connection supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    /// Connection tasks by canonical URL.
    tasks: Mutex<HashMap<String, ConnectionHandle>>,
    accepting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, store: Arc<Store>, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            pipeline,
            tasks: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            shutdown,
        }
    }

    /// Make sure a connection task exists for `url`.
    ///
    /// `url` must already be canonical. Calling this for a URL with a live
    /// task does nothing.
    pub fn ensure_connection(&self, url: &str) -> EnsureOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            return EnsureOutcome::NotAccepting;
        }

        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.get(url) {
            if !handle.is_finished() {
                return EnsureOutcome::AlreadyRunning;
            }
            tasks.remove(url);
        }

        if tasks.len() >= self.config.max_connections {
            tracing::debug!(relay = %url, max = self.config.max_connections, "Connection cap reached");
            return EnsureOutcome::AtCapacity;
        }

        let handle = spawn_connection(
            url.to_string(),
            self.config.connection.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.pipeline),
            self.shutdown.subscribe(),
            self.config.command_buffer,
        );
        tasks.insert(url.to_string(), handle);
        gauge!("relay_tasks").set(tasks.len() as f64);
        tracing::debug!(relay = %url, "Spawned connection task");

        EnsureOutcome::Spawned
    }

    /// Number of connection tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// State of the task for `url`, if any.
    pub fn state(&self, url: &str) -> Option<ConnectionState> {
        self.tasks.lock().get(url).map(ConnectionHandle::state)
    }

    /// URLs whose connection is currently open.
    pub fn open_relays(&self) -> Vec<String> {
        self.tasks
            .lock()
            .values()
            .filter(|h| h.state() == ConnectionState::Open)
            .map(|h| h.url().to_string())
            .collect()
    }

    /// Queue `command` for `url`. Returns false if there is no task or its
    /// queue is full.
    pub fn send_command(&self, url: &str, command: Command) -> bool {
        self.tasks
            .lock()
            .get(url)
            .is_some_and(|handle| handle.try_send(command))
    }

    /// Ensure a task for every relay in the store, up to the cap.
    ///
    /// Returns the number of tasks started.
    pub async fn reconcile(&self) -> Result<usize> {
        let store = Arc::clone(&self.store);
        let urls = tokio::task::spawn_blocking(move || store.list_relay_urls()).await??;

        let mut spawned = 0;
        for url in urls {
            match self.ensure_connection(&url) {
                EnsureOutcome::Spawned => spawned += 1,
                EnsureOutcome::AlreadyRunning => {}
                EnsureOutcome::AtCapacity | EnsureOutcome::NotAccepting => break,
            }
        }

        if spawned > 0 {
            tracing::info!(spawned, total = self.task_count(), "Reconciled relay connections");
        }
        Ok(spawned)
    }

    /// Reconcile now and then every `reconcile_interval` until `shutdown`.
    pub async fn run_reconcile_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
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

            if let Err(e) = self.reconcile().await {
                tracing::warn!("Relay reconcile failed: {}", e);
            }
        }
    }

    /// Refuse new connection tasks from now on.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Close every connection and wait up to `grace` for the tasks to exit.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop_accepting();
        self.shutdown.send_replace(true);

        let handles: Vec<ConnectionHandle> = self.tasks.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        let joined = futures_util::future::join_all(handles.into_iter().map(ConnectionHandle::into_task));

        if tokio::time::timeout(grace, joined).await.is_err() {
            tracing::warn!("{} connection tasks did not stop within {:?}", count, grace);
        }
        gauge!("relay_tasks").set(0.0);

        match tokio::task::spawn_blocking({
            let store = Arc::clone(&self.store);
            move || store.mark_all_inactive()
        })
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Failed to clear active flags: {}", e),
            Err(e) => tracing::warn!("Failed to clear active flags: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;

    fn supervisor(max_connections: usize) -> Supervisor {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            Arc::clone(&store),
            None,
        ));
        let config = SupervisorConfig {
            connection: ConnectionSettings {
                handshake_timeout: Duration::from_millis(200),
                reconnect_delay: Duration::from_secs(60),
            },
            max_connections,
            ..Default::default()
        };
        Supervisor::new(config, store, pipeline)
    }

    // Port 9 on loopback refuses connections quickly.
    const DEAD: &str = "ws://127.0.0.1:9";

    #[tokio::test]
    async fn test_ensure_connection_is_idempotent() {
        let sup = supervisor(10);
        assert_eq!(sup.ensure_connection(DEAD), EnsureOutcome::Spawned);
        assert_eq!(sup.ensure_connection(DEAD), EnsureOutcome::AlreadyRunning);
        assert_eq!(sup.task_count(), 1);
        sup.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_cap_enforced() {
        let sup = supervisor(2);
        assert_eq!(sup.ensure_connection("ws://127.0.0.1:9/a"), EnsureOutcome::Spawned);
        assert_eq!(sup.ensure_connection("ws://127.0.0.1:9/b"), EnsureOutcome::Spawned);
        assert_eq!(sup.ensure_connection("ws://127.0.0.1:9/c"), EnsureOutcome::AtCapacity);
        assert_eq!(sup.task_count(), 2);
        sup.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_not_accepting_after_shutdown() {
        let sup = supervisor(10);
        sup.ensure_connection(DEAD);
        sup.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sup.task_count(), 0);
        assert_eq!(sup.ensure_connection(DEAD), EnsureOutcome::NotAccepting);
    }

    #[tokio::test]
    async fn test_reconcile_spawns_known_relays() {
        let sup = supervisor(10);
        sup.store
            .insert_relay("wss://relay.invalid", relaywatch_core::RelayTier::Seed)
            .unwrap();
        assert_eq!(sup.reconcile().await.unwrap(), 1);
        assert_eq!(sup.reconcile().await.unwrap(), 0);
        sup.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_failed_handshake_counts_attempts() {
        let sup = supervisor(10);
        sup.store
            .insert_relay(DEAD, relaywatch_core::RelayTier::Seed)
            .unwrap();
        sup.ensure_connection(DEAD);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let relay = loop {
            let relay = sup.store.get_relay(DEAD).unwrap().unwrap();
            if relay.last_error.is_some() || tokio::time::Instant::now() > deadline {
                break relay;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert!(relay.connection_attempts >= 1);
        assert_eq!(relay.connection_successes, 0);
        assert!(!relay.active);
        assert!(relay.last_error.is_some());
        // Flat delay of 60s: the task waits instead of retrying
        assert!(matches!(
            sup.state(DEAD),
            Some(ConnectionState::Idle | ConnectionState::Errored)
        ));
        sup.shutdown(Duration::from_secs(2)).await;
    }
}
