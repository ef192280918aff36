//! Core types, validation, and shared utilities for relaywatch.
//!
//! This crate provides:
//! - Structural validation of raw relay events ([`RawEvent`])
//! - Best-effort metadata extraction (profiles, clients, zap amounts)
//! - Relay URL normalization and blocklist filtering
//! - The SQLite-backed aggregate [`Store`]
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod extract;
pub mod metrics;
pub mod store;
pub mod url;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Nostr genesis date: November 7, 2020.
/// Events with `created_at` before this date are considered bogus and are
/// bucketed by their receipt time instead.
pub const NOSTR_GENESIS_TIMESTAMP: u64 = 1604707200; // 2020-11-07 00:00:00 UTC

/// How far into the future a `created_at` may be before it is distrusted.
pub const MAX_FUTURE_SKEW_SECS: u64 = 3600;

pub use error::{Error, Result};
pub use event::{RawEvent, day_key, event_day, kinds, unix_day};
pub use store::{
    ActiveUserDay, BufferedEvent, ClientRecord, DailyAggregate, FlushBatch, FlushOutcome,
    RelayCounters, RelayHealthInputs, RelayObservation, RelayRecord, RelayTier, StoredSnapshot,
    Store, unix_now,
};
pub use url::{NormalizeOptions, NormalizeResult, normalize_relay_url};
