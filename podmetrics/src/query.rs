//! Query ranges and query results.
//!
//! Every [`TimeRange`] maps to exactly one tier of the ladder; there is no
//! stitching across tiers. A query for a key that matches no stored container
//! is not an error, it yields an empty result.
//!
//! # Example Usage
//!
//! ```rust
//! use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetricsStore::open(StoreConfig::default())?;
//! store.push("abc123", MetricPoint::empty(1_700_000_000));
//!
//! let result = store.query_detailed("abc", TimeRange::OneHour);
//! assert_eq!(result.container_id(), Some("abc123"));
//! assert_eq!(result.tier_used(), 0);
//! assert_eq!(result.count(), 1);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::point::MetricPoint;

/// The dashboard's selectable history windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    /// Last hour, served from the raw tier.
    #[serde(rename = "1h")]
    OneHour,
    /// Last day, served from the 1-minute tier.
    #[serde(rename = "24h")]
    OneDay,
    /// Last week, served from the 5-minute tier.
    #[serde(rename = "7d")]
    OneWeek,
    /// Last month, served from the 30-minute tier.
    #[serde(rename = "30d")]
    OneMonth,
    /// Last year, served from the daily tier.
    #[serde(rename = "1y")]
    OneYear,
}

impl TimeRange {
    /// All ranges, in tier order.
    pub const ALL: [TimeRange; 5] = [
        TimeRange::OneHour,
        TimeRange::OneDay,
        TimeRange::OneWeek,
        TimeRange::OneMonth,
        TimeRange::OneYear,
    ];

    /// Index of the tier this range reads.
    pub fn tier_index(self) -> usize {
        match self {
            Self::OneHour => 0,
            Self::OneDay => 1,
            Self::OneWeek => 2,
            Self::OneMonth => 3,
            Self::OneYear => 4,
        }
    }

    /// The short spelling used on the wire and the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::OneWeek => "7d",
            Self::OneMonth => "30d",
            Self::OneYear => "1y",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown range spelling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown time range '{0}': expected one of 1h, 24h, 7d, 30d, 1y")]
pub struct ParseTimeRangeError(String);

impl FromStr for TimeRange {
    type Err = ParseTimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == s.trim())
            .ok_or_else(|| ParseTimeRangeError(s.to_string()))
    }
}

/// Result of a query, with the resolved container id and tier.
///
/// Iterates over the points oldest first.
#[derive(Debug, Clone)]
pub struct QueryResult {
    container_id: Option<String>,
    tier_used: usize,
    points: std::vec::IntoIter<MetricPoint>,
}

impl QueryResult {
    /// Creates a query result.
    pub fn new(container_id: Option<String>, tier_used: usize, points: Vec<MetricPoint>) -> Self {
        Self {
            container_id,
            tier_used,
            points: points.into_iter(),
        }
    }

    /// The stored id the key resolved to, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Tier index the points came from.
    pub fn tier_used(&self) -> usize {
        self.tier_used
    }

    /// `(oldest, newest)` timestamps of the remaining points.
    pub fn available_range(&self) -> (Option<i64>, Option<i64>) {
        let slice = self.points.as_slice();
        (
            slice.first().map(|p| p.timestamp),
            slice.last().map(|p| p.timestamp),
        )
    }

    /// Collects the remaining points.
    pub fn collect_all(self) -> Vec<MetricPoint> {
        self.points.collect()
    }
}

impl Iterator for QueryResult {
    type Item = MetricPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.points.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

impl ExactSizeIterator for QueryResult {}
