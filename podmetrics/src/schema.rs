//! Tier ladder and store configuration.
//!
//! A store holds, for every container, one series per retention tier. The
//! ladder is fixed at store creation: five tiers ordered from the finest
//! resolution to the coarsest, each rolling up from its predecessor.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::query::TimeRange;

/// Default fraction of expected source points a bucket needs before it rolls up.
pub const DEFAULT_COMPLETENESS_RATIO: f64 = 0.8;

/// Configuration for a single resolution tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierConfig {
    /// Short tier name (e.g. `raw`, `m1`).
    pub name: String,

    /// Width of one logical bucket in this tier.
    ///
    /// For the first tier this is the expected sampling cadence; for the
    /// others it is the bucket width rolled up from the previous tier.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// How much history this tier keeps.
    #[serde(with = "duration_serde")]
    pub retention: Duration,
}

impl TierConfig {
    /// Creates a validated tier configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidTierConfig`] if the interval or retention
    /// is zero, or the retention is shorter than one interval.
    pub fn new(name: impl Into<String>, interval: Duration, retention: Duration) -> Result<Self> {
        let config = Self {
            name: name.into(),
            interval,
            retention,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates this tier configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidTierConfig`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| SchemaError::InvalidTierConfig {
            tier: self.name.clone(),
            reason,
        };

        if self.interval.as_secs() == 0 {
            return Err(invalid("interval must be at least one second".to_string()).into());
        }
        if self.retention.is_zero() {
            return Err(invalid("retention cannot be zero".to_string()).into());
        }
        if self.retention < self.interval {
            return Err(invalid(format!(
                "retention ({:?}) must be >= interval ({:?})",
                self.retention, self.interval
            ))
            .into());
        }

        Ok(())
    }

    /// Bucket width in whole seconds.
    #[allow(clippy::cast_possible_wrap)] // validated intervals are far below i64::MAX seconds
    pub fn interval_secs(&self) -> i64 {
        self.interval.as_secs() as i64
    }

    /// Retention window in whole seconds.
    #[allow(clippy::cast_possible_wrap)]
    pub fn retention_secs(&self) -> i64 {
        self.retention.as_secs() as i64
    }
}

/// Aggregation function used when rolling a bucket of points into one.
///
/// Non-finite values are ignored. An empty (or all-NaN) input yields NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsolidationFn {
    /// Arithmetic mean.
    Average,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Most recent value.
    Last,
}

impl ConsolidationFn {
    /// Applies this consolidation function to a slice of values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use podmetrics::schema::ConsolidationFn;
    ///
    /// let values = [1.0, 2.0, f64::NAN, 4.0];
    ///
    /// let avg = ConsolidationFn::Average.apply(&values);
    /// assert!((avg - (7.0 / 3.0)).abs() < 1e-10);
    /// assert_eq!(ConsolidationFn::Min.apply(&values), 1.0);
    /// assert_eq!(ConsolidationFn::Max.apply(&values), 4.0);
    /// assert_eq!(ConsolidationFn::Last.apply(&values), 4.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // bucket sizes are tiny
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut valid = values.iter().copied().filter(|v| v.is_finite()).peekable();
        if valid.peek().is_none() {
            return f64::NAN;
        }

        match self {
            Self::Average => {
                let (sum, count) = valid.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            Self::Min => valid.fold(f64::INFINITY, f64::min),
            Self::Max => valid.fold(f64::NEG_INFINITY, f64::max),
            Self::Last => valid.last().unwrap_or(f64::NAN),
        }
    }
}

/// Which consolidation function applies to which point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationPolicy {
    /// CPU, memory usage, network and block counters.
    pub usage: ConsolidationFn,
    /// Memory limit. A limit should not be averaged away.
    pub memory_limit: ConsolidationFn,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            usage: ConsolidationFn::Average,
            memory_limit: ConsolidationFn::Max,
        }
    }
}

/// Full configuration of a [`MetricsStore`](crate::store::MetricsStore).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use podmetrics::schema::StoreConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut config = StoreConfig::default();
/// config.tiers[0].interval = Duration::from_secs(10);
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Retention tiers, finest first. One per [`TimeRange`].
    pub tiers: Vec<TierConfig>,

    /// Per-field aggregation used by rollups.
    pub aggregation: AggregationPolicy,

    /// Fraction of expected source points a bucket needs to be rolled up.
    pub completeness_ratio: f64,

    /// Minimum spacing, in point time, between rollup+prune passes.
    #[serde(with = "duration_serde")]
    pub maintenance_interval: Duration,

    /// Minimum spacing between rate-limited snapshot saves.
    #[serde(with = "duration_serde")]
    pub save_interval: Duration,

    /// Snapshot file. `None` keeps the store purely in memory.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;

        let tier = |name: &str, interval: u64, retention: u64| TierConfig {
            name: name.to_string(),
            interval: Duration::from_secs(interval),
            retention: Duration::from_secs(retention),
        };

        Self {
            tiers: vec![
                tier("raw", 5, HOUR),
                tier("m1", MINUTE, DAY),
                tier("m5", 5 * MINUTE, 7 * DAY),
                tier("m30", 30 * MINUTE, 90 * DAY),
                tier("daily", DAY, 365 * DAY),
            ],
            aggregation: AggregationPolicy::default(),
            completeness_ratio: DEFAULT_COMPLETENESS_RATIO,
            maintenance_interval: Duration::from_secs(MINUTE),
            save_interval: Duration::from_secs(MINUTE),
            snapshot_path: None,
        }
    }
}

impl StoreConfig {
    /// Returns the default ladder persisting to `path`.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Validates the ladder and the store knobs.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if:
    /// - the ladder does not have exactly one tier per [`TimeRange`]
    /// - any tier is invalid
    /// - intervals do not strictly increase, or are not whole multiples of
    ///   the previous tier's interval
    /// - the completeness ratio is outside (0, 1]
    /// - a cadence is zero
    pub fn validate(&self) -> Result<()> {
        if self.tiers.len() != TimeRange::ALL.len() {
            return Err(SchemaError::WrongTierCount {
                expected: TimeRange::ALL.len(),
                found: self.tiers.len(),
            }
            .into());
        }

        for tier in &self.tiers {
            tier.validate()?;
        }

        for window in self.tiers.windows(2) {
            let (source, target) = (&window[0], &window[1]);
            if source.interval >= target.interval {
                return Err(SchemaError::TiersNotOrdered.into());
            }
            if target.interval.as_secs() % source.interval.as_secs() != 0 {
                return Err(SchemaError::IntervalNotMultiple {
                    source_interval: source.interval,
                    target: target.interval,
                }
                .into());
            }
        }

        if !(self.completeness_ratio > 0.0 && self.completeness_ratio <= 1.0) {
            return Err(SchemaError::InvalidCompleteness {
                ratio: self.completeness_ratio,
            }
            .into());
        }

        if self.maintenance_interval.is_zero() {
            return Err(SchemaError::ZeroInterval {
                setting: "maintenance_interval",
            }
            .into());
        }

        Ok(())
    }

    /// Computes a stable hash of the tier ladder.
    ///
    /// Stored in snapshots so that data written under one ladder is never
    /// loaded into a store configured with another.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tiers.hash(&mut hasher);
        hasher.finish()
    }

    /// Maintenance cadence in whole seconds (at least one).
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn maintenance_secs(&self) -> i64 {
        self.maintenance_interval.as_secs().max(1) as i64
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
