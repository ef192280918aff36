//! Reporting time ranges and their day windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use relaywatch_core::day_key;

use crate::Error;

/// A reporting range ending at the pass start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    /// Every range, in the order a pass computes them.
    pub const ALL: [TimeRange; 5] = [
        TimeRange::Day,
        TimeRange::Week,
        TimeRange::Month,
        TimeRange::Quarter,
        TimeRange::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
            TimeRange::All => "all",
        }
    }

    /// Length of the range; `None` for `all`.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TimeRange::Day => Some(Duration::hours(24)),
            TimeRange::Week => Some(Duration::days(7)),
            TimeRange::Month => Some(Duration::days(30)),
            TimeRange::Quarter => Some(Duration::days(90)),
            TimeRange::All => None,
        }
    }

    /// Day window `[pass_start - range, pass_start]`.
    pub fn window(&self, pass_start: DateTime<Utc>) -> Window {
        Window {
            start: self.duration().map(|d| (pass_start - d).date_naive()),
            end: pass_start.date_naive(),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            "all" => Ok(TimeRange::All),
            other => Err(Error::UnknownRange(other.to_string())),
        }
    }
}

/// Inclusive UTC day bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First day, `None` when unbounded.
    pub start: Option<NaiveDate>,
    /// Last day.
    pub end: NaiveDate,
}

impl Window {
    /// Day keys for SQL `BETWEEN`; an unbounded start becomes the empty
    /// string, which sorts before every day key.
    pub fn bounds(&self) -> (String, String) {
        (
            self.start.map(day_key).unwrap_or_default(),
            day_key(self.end),
        )
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start.is_none_or(|start| day >= start) && day <= self.end
    }
}
