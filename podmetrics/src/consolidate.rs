//! Rollup and prune passes over the tier ladder.
//!
//! # Design
//!
//! A maintenance pass walks every container and:
//! - rolls each tier up into the next one, finest first (raw→m1, m1→m5,
//!   m5→m30, m30→daily), so each step sees what the previous step just emitted
//! - then prunes every tier to its retention window
//!
//! # Consolidation Flow
//!
//! ```text
//! raw (5s) ─► m1 (60s) ─► m5 (300s) ─► m30 (1800s) ─► daily (86400s)
//! ```
//!
//! # Cursors
//!
//! There is no separate cursor file: the newest timestamp of the target tier
//! is the cursor. A source point is a candidate only if its target bucket is
//! strictly newer than that timestamp, so an emitted bucket is never emitted
//! twice and target timestamps stay strictly increasing.
//!
//! # Completeness
//!
//! A bucket holding every expected source point is emitted right away. Once
//! the bucket has ended (`start + interval <= now`) it is emitted if it holds
//! at least `ceil(target_interval / source_interval * completeness_ratio)`
//! source points, and skipped for good otherwise. Open buckets wait for a
//! later pass.

use std::collections::BTreeMap;

use crate::point::MetricPoint;
use crate::schema::{AggregationPolicy, StoreConfig, TierConfig};
use crate::series::{ContainerSeries, SeriesRegistry, TierSeries};

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Rolled-up points written across all tiers and containers.
    pub buckets_emitted: usize,
    /// Points removed by retention pruning.
    pub points_pruned: usize,
}

impl ConsolidationReport {
    /// Whether the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        self.buckets_emitted == 0 && self.points_pruned == 0
    }
}

/// Source points grouped into one target-tier bucket.
#[derive(Debug)]
pub struct ConsolidationWindow {
    /// Bucket boundary (inclusive start).
    pub start_timestamp: i64,
    /// Points falling in `[start, start + interval)`.
    pub points: Vec<MetricPoint>,
}

impl ConsolidationWindow {
    /// Creates a new empty window.
    pub fn new(start_timestamp: i64) -> Self {
        Self {
            start_timestamp,
            points: Vec::new(),
        }
    }

    /// Aggregates the window if it holds at least `min_points` points.
    pub fn consolidate(&self, min_points: usize, policy: AggregationPolicy) -> Option<MetricPoint> {
        if self.points.len() < min_points {
            return None;
        }
        MetricPoint::consolidate(self.start_timestamp, &self.points, policy)
    }
}

/// Start of the bucket of width `interval` containing `timestamp`.
#[inline]
pub fn bucket_start(timestamp: i64, interval: i64) -> i64 {
    timestamp.div_euclid(interval) * interval
}

/// Number of source points a full target bucket holds.
pub fn expected_points_per_bucket(source: &TierConfig, target: &TierConfig) -> usize {
    usize::try_from(target.interval_secs() / source.interval_secs())
        .unwrap_or(1)
        .max(1)
}

/// Minimum number of source points for a target bucket to count as complete.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)] // small positive ratios of tier intervals
pub fn min_points_per_bucket(source: &TierConfig, target: &TierConfig, ratio: f64) -> usize {
    let expected = expected_points_per_bucket(source, target);
    // The epsilon keeps e.g. 5 * 0.8 from rounding up to 5.
    let needed = (expected as f64 * ratio - 1e-9).ceil();
    (needed as usize).max(1)
}

/// Drives rollup and pruning for a store's ladder.
#[derive(Debug, Clone)]
pub struct ConsolidationEngine {
    tiers: Vec<TierConfig>,
    policy: AggregationPolicy,
    completeness_ratio: f64,
}

impl ConsolidationEngine {
    /// Creates an engine for a validated store configuration.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            tiers: config.tiers.clone(),
            policy: config.aggregation,
            completeness_ratio: config.completeness_ratio,
        }
    }

    /// Runs one full pass: rollup then prune, for every container.
    ///
    /// `now` is the reference time for retention.
    pub fn run(&self, registry: &mut SeriesRegistry, now: i64) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();

        for (_, series) in registry.iter_mut() {
            report.buckets_emitted += self.rollup(series, now);
        }
        for (_, series) in registry.iter_mut() {
            report.points_pruned += self.prune(series, now);
        }

        report
    }

    /// Rolls every tier of one container into the next. Returns points emitted.
    ///
    /// Buckets ending after `now` are only emitted once full.
    pub fn rollup(&self, series: &mut ContainerSeries, now: i64) -> usize {
        let tiers = series.tiers_mut();
        let mut emitted = 0;

        for source_index in 0..self.tiers.len().saturating_sub(1) {
            let target_index = source_index + 1;
            let (left, right) = tiers.split_at_mut(target_index);
            emitted += self.rollup_pair(
                &left[source_index],
                &mut right[0],
                &self.tiers[source_index],
                &self.tiers[target_index],
                now,
            );
        }

        emitted
    }

    /// Rolls `source` into `target` for one tier pair.
    fn rollup_pair(
        &self,
        source: &TierSeries,
        target: &mut TierSeries,
        source_tier: &TierConfig,
        target_tier: &TierConfig,
        now: i64,
    ) -> usize {
        let interval = target_tier.interval_secs();
        let expected = expected_points_per_bucket(source_tier, target_tier);
        let min_points = min_points_per_bucket(source_tier, target_tier, self.completeness_ratio);

        // Buckets at or before the target's newest point are already done.
        let from = match target.last_timestamp() {
            Some(last) => last.saturating_add(interval),
            None => i64::MIN,
        };

        let mut windows: BTreeMap<i64, ConsolidationWindow> = BTreeMap::new();
        for point in source.since(from) {
            let start = bucket_start(point.timestamp, interval);
            windows
                .entry(start)
                .or_insert_with(|| ConsolidationWindow::new(start))
                .points
                .push(*point);
        }

        let mut emitted = 0;
        for window in windows.values() {
            let closed = window.start_timestamp.saturating_add(interval) <= now;
            let needed = if closed { min_points } else { expected };
            if let Some(rolled) = window.consolidate(needed, self.policy)
                && target.append(rolled)
            {
                emitted += 1;
            }
        }

        emitted
    }

    /// Drops points older than each tier's retention. Returns points removed.
    pub fn prune(&self, series: &mut ContainerSeries, now: i64) -> usize {
        series
            .tiers_mut()
            .iter_mut()
            .zip(&self.tiers)
            .map(|(tier, config)| tier.prune_before(now.saturating_sub(config.retention_secs())))
            .sum()
    }

    /// Tier configurations, finest first.
    pub fn tiers(&self) -> &[TierConfig] {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: i64, cpu: f64) -> MetricPoint {
        MetricPoint {
            cpu_percent: cpu,
            memory_limit_bytes: 1000.0 + cpu,
            ..MetricPoint::empty(ts)
        }
    }

    fn engine() -> ConsolidationEngine {
        ConsolidationEngine::new(&StoreConfig::default())
    }

    fn series_with_raw(points: impl IntoIterator<Item = MetricPoint>) -> ContainerSeries {
        let mut series = ContainerSeries::new(5);
        for p in points {
            series.raw_mut().append(p);
        }
        series
    }

    #[test]
    fn test_bucket_start() {
        assert_eq!(bucket_start(0, 60), 0);
        assert_eq!(bucket_start(59, 60), 0);
        assert_eq!(bucket_start(60, 60), 60);
        assert_eq!(bucket_start(-1, 60), -60);
    }

    #[test]
    fn test_min_points_per_bucket_for_default_ladder() {
        let config = StoreConfig::default();
        let t = &config.tiers;
        assert_eq!(min_points_per_bucket(&t[0], &t[1], 0.8), 10); // 12 expected
        assert_eq!(min_points_per_bucket(&t[1], &t[2], 0.8), 4); // 5 expected
        assert_eq!(min_points_per_bucket(&t[2], &t[3], 0.8), 5); // 6 expected
        assert_eq!(min_points_per_bucket(&t[3], &t[4], 0.8), 39); // 48 expected
        assert_eq!(min_points_per_bucket(&t[0], &t[1], 1.0), 12);
    }

    #[test]
    fn test_complete_bucket_is_averaged_at_boundary() {
        // 12 points at 60, 65, ..., 115 with cpu 0..11
        let mut series = series_with_raw((0..12).map(|i| point(60 + i * 5, i as f64)));

        let emitted = engine().rollup(&mut series, 120);
        assert_eq!(emitted, 1);

        let m1 = series.tier(1).unwrap().to_vec();
        assert_eq!(m1.len(), 1);
        assert_eq!(m1[0].timestamp, 60);
        assert!((m1[0].cpu_percent - 5.5).abs() < 1e-9);
        assert_eq!(m1[0].memory_limit_bytes, 1011.0);
    }

    #[test]
    fn test_incomplete_bucket_waits() {
        let engine = engine();
        let mut series = series_with_raw((0..9).map(|i| point(i * 5, 1.0)));

        assert_eq!(engine.rollup(&mut series, 60), 0);
        assert!(series.tier(1).unwrap().is_empty());

        // Ten of twelve points is enough, but only once the minute is over.
        series.raw_mut().append(point(45, 1.0));
        assert_eq!(engine.rollup(&mut series, 50), 0);
        assert_eq!(engine.rollup(&mut series, 60), 1);
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let engine = engine();
        let mut series = series_with_raw((0..30).map(|i| point(i * 5, 2.0)));

        let first = engine.rollup(&mut series, 150);
        let second = engine.rollup(&mut series, 150);

        assert_eq!(first, 2); // buckets 0 and 60; bucket 120 has 6 points
        assert_eq!(second, 0);
        let timestamps: Vec<_> = series.tier(1).unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![0, 60]);
    }

    #[test]
    fn test_rollup_cascades_within_one_pass() {
        // 5 full minutes of raw data: m1 gets 5 points, m5 needs 4 of them.
        let mut series = series_with_raw((0..60).map(|i| point(i * 5, 3.0)));

        let emitted = engine().rollup(&mut series, 300);

        assert_eq!(series.tier(1).unwrap().len(), 5);
        assert_eq!(series.tier(2).unwrap().len(), 1);
        assert_eq!(series.tier(2).unwrap().latest().unwrap().timestamp, 0);
        assert_eq!(emitted, 6);
    }

    #[test]
    fn test_open_bucket_waits_for_last_source_point() {
        // Four of five minutes present: enough once closed, not before.
        let mut series = ContainerSeries::new(5);
        for i in 0..4 {
            series.tiers_mut()[1].append(point(i * 60, 1.0));
        }
        let engine = engine();

        assert_eq!(engine.rollup(&mut series, 240), 0);
        series.tiers_mut()[1].append(point(240, 6.0));
        assert_eq!(engine.rollup(&mut series, 240), 1);

        let m5 = series.tier(2).unwrap().latest().copied().unwrap();
        assert!((m5.cpu_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_closed_bucket_is_skipped_for_good() {
        let engine = engine();
        let mut series = series_with_raw((0..5).map(|i| point(i * 5, 1.0)));
        for i in 0..12 {
            series.raw_mut().append(point(60 + i * 5, 1.0));
        }

        assert_eq!(engine.rollup(&mut series, 120), 1);
        assert_eq!(engine.rollup(&mut series, 600), 0);
        let m1: Vec<_> = series.tier(1).unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(m1, vec![60]);
    }

    #[test]
    fn test_prune_respects_each_retention() {
        let engine = engine();
        let mut series = series_with_raw((0..10).map(|i| point(i * 5, 1.0)));
        series.tiers_mut()[1].append(point(0, 1.0));

        // now - 3600 = 20: raw keeps 20..45, m1 keeps everything.
        let pruned = engine.prune(&mut series, 3620);
        assert_eq!(pruned, 4);
        assert_eq!(series.raw().iter().next().unwrap().timestamp, 20);
        assert_eq!(series.tier(1).unwrap().len(), 1);
    }

    #[test]
    fn test_run_reports_totals() {
        let mut registry = SeriesRegistry::new();
        for id in ["a", "b"] {
            let series = registry.get_or_create(id, 5);
            for i in 0..12 {
                series.raw_mut().append(point(i * 5, 1.0));
            }
        }

        let report = engine().run(&mut registry, 3605);
        assert_eq!(report.buckets_emitted, 2);
        assert_eq!(report.points_pruned, 2); // t=0 in each raw tier
        assert!(!report.is_empty());
    }
}
