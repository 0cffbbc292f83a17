//! Per-container series storage and container key resolution.
//!
//! # Overview
//!
//! - [`TierSeries`] - time-ascending points for one (container, tier) pair
//! - [`ContainerSeries`] - one [`TierSeries`] per tier of the ladder
//! - [`SeriesRegistry`] - every container's series, keyed by container id
//!
//! The registry is ordered by id so prefix lookups are a range scan.
//!
//! # Key resolution
//!
//! Callers often hold truncated container ids. [`SeriesRegistry::resolve`]
//! maps a key to a stored id with one deterministic rule:
//!
//! 1. an exact match wins;
//! 2. otherwise the key must be a prefix of exactly one stored id;
//! 3. anything else (no candidate, several candidates, empty key) is no match.

use std::collections::{BTreeMap, VecDeque};

use crate::point::MetricPoint;

/// Time-ascending points for one container in one tier.
///
/// Timestamps are strictly increasing: appends that would break this are
/// refused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierSeries {
    points: VecDeque<MetricPoint>,
}

impl TierSeries {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from stored points, keeping only a strictly increasing run.
    pub fn from_points(points: impl IntoIterator<Item = MetricPoint>) -> Self {
        let mut series = Self::new();
        for point in points {
            series.append(point);
        }
        series
    }

    /// Appends a point if it is newer than the current newest point.
    ///
    /// Returns `false` (and stores nothing) for a duplicate or out-of-order
    /// timestamp.
    pub fn append(&mut self, point: MetricPoint) -> bool {
        if let Some(last) = self.points.back()
            && point.timestamp <= last.timestamp
        {
            return false;
        }
        self.points.push_back(point);
        true
    }

    /// Timestamp of the newest point.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.points.back().map(|p| p.timestamp)
    }

    /// Newest point.
    pub fn latest(&self) -> Option<&MetricPoint> {
        self.points.back()
    }

    /// Removes every point older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: i64) -> usize {
        let keep_from = self.points.partition_point(|p| p.timestamp < cutoff);
        self.points.drain(..keep_from);
        keep_from
    }

    /// Points whose timestamp is at or after `from`, oldest first.
    pub fn since(&self, from: i64) -> impl Iterator<Item = &MetricPoint> {
        let start = self.points.partition_point(|p| p.timestamp < from);
        self.points.range(start..)
    }

    /// Iterates over all points, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter()
    }

    /// Copies the points out, oldest first.
    pub fn to_vec(&self) -> Vec<MetricPoint> {
        self.points.iter().copied().collect()
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// All tiers for one container, index-aligned with the store's ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSeries {
    tiers: Vec<TierSeries>,
}

impl ContainerSeries {
    /// Creates empty series for a ladder of `tier_count` tiers.
    pub fn new(tier_count: usize) -> Self {
        Self {
            tiers: vec![TierSeries::new(); tier_count],
        }
    }

    /// Wraps already-built tier series.
    pub fn from_tiers(tiers: Vec<TierSeries>) -> Self {
        Self { tiers }
    }

    /// The finest tier.
    pub fn raw(&self) -> &TierSeries {
        &self.tiers[0]
    }

    /// Mutable access to the finest tier.
    pub fn raw_mut(&mut self) -> &mut TierSeries {
        &mut self.tiers[0]
    }

    /// One tier by index.
    pub fn tier(&self, index: usize) -> Option<&TierSeries> {
        self.tiers.get(index)
    }

    /// All tiers, finest first.
    pub fn tiers(&self) -> &[TierSeries] {
        &self.tiers
    }

    /// Mutable access to all tiers, finest first.
    pub fn tiers_mut(&mut self) -> &mut [TierSeries] {
        &mut self.tiers
    }

    /// Point count per tier.
    pub fn points_per_tier(&self) -> Vec<usize> {
        self.tiers.iter().map(TierSeries::len).collect()
    }
}

/// Every container's series, ordered by container id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRegistry {
    containers: BTreeMap<String, ContainerSeries>,
}

impl SeriesRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key` to a stored container id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use podmetrics::series::SeriesRegistry;
    ///
    /// let mut registry = SeriesRegistry::new();
    /// registry.get_or_create("foo", 5);
    /// registry.get_or_create("foobar", 5);
    ///
    /// assert_eq!(registry.resolve("foo"), Some("foo"));
    /// assert_eq!(registry.resolve("foob"), Some("foobar"));
    /// assert_eq!(registry.resolve("fo"), None); // ambiguous
    /// assert_eq!(registry.resolve("bar"), None);
    /// ```
    pub fn resolve(&self, key: &str) -> Option<&str> {
        if key.is_empty() {
            return None;
        }
        if let Some((id, _)) = self.containers.get_key_value(key) {
            return Some(id.as_str());
        }

        let mut candidates = self
            .containers
            .range::<str, _>((std::ops::Bound::Included(key), std::ops::Bound::Unbounded))
            .map(|(id, _)| id)
            .take_while(|id| id.starts_with(key));

        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Looks up a container by key, resolving prefixes.
    pub fn lookup(&self, key: &str) -> Option<&ContainerSeries> {
        let id = self.resolve(key)?;
        self.containers.get(id)
    }

    /// Returns the series for an exact id, creating it if absent.
    pub fn get_or_create(&mut self, container_id: &str, tier_count: usize) -> &mut ContainerSeries {
        self.containers
            .entry(container_id.to_string())
            .or_insert_with(|| ContainerSeries::new(tier_count))
    }

    /// Inserts or replaces a container's series.
    pub fn insert(&mut self, container_id: String, series: ContainerSeries) {
        self.containers.insert(container_id, series);
    }

    /// Removes every container for which `keep` returns `false`.
    ///
    /// Returns the removed ids.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let removed: Vec<String> = self
            .containers
            .keys()
            .filter(|id| !keep(id.as_str()))
            .cloned()
            .collect();
        for id in &removed {
            self.containers.remove(id);
        }
        removed
    }

    /// Iterates over `(id, series)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContainerSeries)> {
        self.containers.iter().map(|(id, s)| (id.as_str(), s))
    }

    /// Mutable iteration in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ContainerSeries)> {
        self.containers.iter_mut().map(|(id, s)| (id.as_str(), s))
    }

    /// Number of containers with stored series.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether no container has stored series.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
