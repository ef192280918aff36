//! Ordered shutdown of the ingestion side.
//!
//! 1. Stop accepting new connections
//! 2. Flush the ingest buffer
//! 3. Close all relay sockets, ingesting frames that arrive while closing
//! 4. Flush again

use std::time::Duration;

use crate::pipeline::Pipeline;
use crate::relay::Supervisor;

/// What [`graceful_shutdown`] flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events aggregated by the flush before sockets were closed.
    pub flushed_before_close: usize,
    /// Events aggregated by the final flush.
    pub flushed_after_close: usize,
    /// Events still buffered because the final flush failed.
    pub lost: usize,
}

/// Stop ingestion in order, waiting up to `grace` for connections to close.
pub async fn graceful_shutdown(
    supervisor: &Supervisor,
    pipeline: &Pipeline,
    grace: Duration,
) -> ShutdownReport {
    supervisor.stop_accepting();

    let flushed_before_close = match pipeline.flush_now().await {
        Ok(outcome) => outcome.applied,
        Err(e) => {
            tracing::error!("Flush before close failed: {}", e);
            0
        }
    };

    supervisor.shutdown(grace).await;

    let flushed_after_close = match pipeline.flush_now().await {
        Ok(outcome) => outcome.applied,
        Err(e) => {
            tracing::error!("Final flush failed: {}", e);
            0
        }
    };

    let report = ShutdownReport {
        flushed_before_close,
        flushed_after_close,
        lost: pipeline.buffered_len(),
    };
    tracing::debug!(?report, "Ingestion stopped");
    report
}
