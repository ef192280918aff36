//! Statistics snapshot types.
//!
//! A [`RangeStats`] body is computed in one read transaction and stored as
//! the snapshot payload. The store assigns the version on publish, and
//! [`StatisticsSnapshot`] pairs the two.

use serde::{Deserialize, Serialize};

use relaywatch_core::StoredSnapshot;

use crate::{Result, TimeRange};

/// Network-wide totals for a range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    /// Relays in the registry.
    pub known_relays: u64,
    /// Relays connected right now.
    pub active_relays: u64,
    /// Relays that delivered at least one event in range.
    pub relays_with_events: u64,
    pub events: u64,
    pub distinct_authors: u64,
    /// Mean over relays with a latency estimate.
    pub mean_latency_ms: Option<f64>,
    /// Zap volume in sats.
    pub value_sum: u64,
}

/// One row of the per-relay table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRow {
    pub url: String,
    pub tier: String,
    pub events: u64,
    pub unique_authors: u64,
    pub latency_ms: Option<f64>,
    pub health_score: f64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindShare {
    pub kind: u32,
    pub events: u64,
    /// Fraction of all events in range.
    pub share: f64,
}

/// Daily count of one top kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDayPoint {
    pub day: String,
    pub kind: u32,
    pub events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindDistribution {
    pub top: Vec<KindShare>,
    pub series: Vec<KindDayPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: u32,
    pub events: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientShare {
    pub name: String,
    pub events: u64,
    /// Fraction of events with a known client.
    pub share: f64,
    pub kinds: Vec<KindCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopRelay {
    /// 1-based.
    pub rank: u32,
    pub url: String,
    pub events: u64,
    pub active_users: u64,
    pub kinds: Vec<KindCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub day: String,
    pub events: u64,
    pub active_authors: u64,
}

/// Everything computed for one range in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    /// First day of the window, absent for `all`.
    pub start_day: Option<String>,
    pub end_day: String,
    pub overview: Overview,
    pub relays: Vec<RelayRow>,
    pub kinds: KindDistribution,
    pub clients: Vec<ClientShare>,
    pub top_relays: Vec<TopRelay>,
    pub timeline: Vec<TimelinePoint>,
}

/// A published, versioned range snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub range: TimeRange,
    /// Increases by one on every publish of this range.
    pub version: u64,
    /// Pass start, unix seconds.
    pub computed_at: i64,
    pub stats: RangeStats,
}

impl StatisticsSnapshot {
    /// Rebuild a snapshot from its stored row.
    pub fn from_stored(stored: &StoredSnapshot) -> Result<Self> {
        Ok(Self {
            range: stored.range.parse()?,
            version: stored.version,
            computed_at: stored.computed_at,
            stats: serde_json::from_str(&stored.payload)?,
        })
    }
}
