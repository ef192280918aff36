//! relaywatch statistics.
//!
//! Recomputes multi-range rollups from the aggregate store on a fixed
//! cadence and publishes them as versioned snapshots.
//!
//! # Modules
//!
//! - [`range`] - Reporting ranges (`24h`, `7d`, `30d`, `90d`, `all`) and day windows
//! - [`queries`] - SQL for one range inside one read transaction
//! - [`scoring`] - Relay health scores
//! - [`aggregator`] - Pass and retention loops
//! - [`cache`] - Read-through snapshot cache
//!
//! # Read contract
//!
//! ```ignore
//! let snapshot = cache.get_latest_snapshot(TimeRange::Day).await?;
//! ```

pub mod aggregator;
pub mod cache;
mod error;
pub mod queries;
pub mod range;
pub mod scoring;
pub mod snapshot;

pub use aggregator::{Aggregator, AggregatorConfig, PassReport, RangeComputer, RetentionReport};
pub use cache::SnapshotCache;
pub use error::{Error, Result};
pub use range::{TimeRange, Window};
pub use snapshot::{RangeStats, StatisticsSnapshot};
