//! Prometheus metrics helpers for relaywatch.
//!
//! Both daemons install one Prometheus recorder at startup and optionally
//! serve it over HTTP:
//!
//! ```rust,ignore
//! use relaywatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics()?;
//! start_metrics_server(9091, handle).await?;
//! metrics::counter!("ingest_events_total").increment(1);
//! ```
//!
//! Names are prefixed by component (`ingest_`, `relay_`, `discovery_`,
//! `stats_`) and suffixed by unit (`_total`, `_seconds`).

use std::net::SocketAddr;

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register metric descriptions.
///
/// Fails if a recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Serve `/metrics` on `port` from a background task.
///
/// Binding happens before returning so a taken port is reported to the caller.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_metrics() {
    // Ingestion pipeline
    describe_counter!("ingest_events_total", "Events received from relays");
    describe_counter!(
        "ingest_events_duplicate_total",
        "Events already seen from another relay"
    );
    describe_counter!(
        "ingest_events_invalid_total",
        "Events rejected by structural validation"
    );
    describe_counter!(
        "ingest_events_flushed_total",
        "Events aggregated into the store"
    );
    describe_counter!("ingest_flushes_total", "Successful flush transactions");
    describe_counter!(
        "ingest_events_dropped_total",
        "Events dropped because the ingest buffer was full"
    );
    describe_counter!(
        "ingest_flush_failures_total",
        "Flush transactions rolled back and requeued"
    );
    describe_gauge!("ingest_buffer_len", "Events waiting in the ingest buffer");
    describe_gauge!("ingestion_running", "1 while the ingestion daemon is running");
    describe_histogram!("ingest_flush_duration_seconds", "Time spent per flush");

    // Connections
    describe_counter!("relay_connect_attempts_total", "Relay connection attempts");
    describe_counter!("relay_connects_total", "Successful relay handshakes");
    describe_counter!("relay_disconnects_total", "Relay connections closed or failed");
    describe_counter!(
        "relay_frames_malformed_total",
        "Inbound frames dropped as malformed"
    );
    describe_gauge!("relay_connections_open", "Relay connections currently open");
    describe_gauge!("relay_tasks", "Relay connection tasks alive");

    // Discovery
    describe_counter!("relay_discovered_total", "New relays found by discovery");
    describe_counter!(
        "discovery_relay_lists_total",
        "Relay-list records processed by discovery"
    );
    describe_counter!(
        "discovery_relay_lists_dropped_total",
        "Relay-list records dropped because discovery was busy"
    );
    describe_counter!("discovery_queries_total", "Active discovery subscriptions sent");

    // Statistics
    describe_counter!("stats_passes_total", "Aggregation passes run");
    describe_counter!(
        "stats_pass_failures_total",
        "Range computations that failed (label: range)"
    );
    describe_counter!(
        "stats_snapshots_published_total",
        "Snapshots stored and cached (label: range)"
    );
    describe_histogram!(
        "stats_range_duration_seconds",
        "Time to compute one range (label: range)"
    );
    describe_counter!("stats_retention_rows_pruned_total", "Rows removed by retention");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = init_metrics();
        });
    }

    #[test]
    fn test_second_install_fails() {
        ensure_metrics_init();
        assert!(init_metrics().is_err());
    }

    #[test]
    fn test_register_metrics_repeatable() {
        ensure_metrics_init();
        register_metrics();
        register_metrics();
    }
}
