//! The resource-usage sample stored in every tier.

use serde::{Deserialize, Serialize};

use crate::schema::{AggregationPolicy, ConsolidationFn};

/// A single resource-usage sample for one container.
///
/// In the `raw` tier the I/O fields are cumulative counters as reported by the
/// runtime; in rolled-up tiers every field is the bucket aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Unix timestamp in seconds. For rolled-up points, the bucket boundary.
    pub timestamp: i64,
    /// CPU usage, 0 to 100.
    pub cpu_percent: f64,
    /// Memory in use.
    pub memory_used_bytes: f64,
    /// Memory limit.
    pub memory_limit_bytes: f64,
    /// Bytes received over all interfaces.
    pub network_in_bytes: f64,
    /// Bytes sent over all interfaces.
    pub network_out_bytes: f64,
    /// Bytes read from all block devices.
    pub block_in_bytes: f64,
    /// Bytes written to all block devices.
    pub block_out_bytes: f64,
}

impl MetricPoint {
    /// A point with every measurement zeroed.
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            cpu_percent: 0.0,
            memory_used_bytes: 0.0,
            memory_limit_bytes: 0.0,
            network_in_bytes: 0.0,
            network_out_bytes: 0.0,
            block_in_bytes: 0.0,
            block_out_bytes: 0.0,
        }
    }

    /// Whether every measurement is a finite number.
    pub fn is_finite(&self) -> bool {
        [
            self.cpu_percent,
            self.memory_used_bytes,
            self.memory_limit_bytes,
            self.network_in_bytes,
            self.network_out_bytes,
            self.block_in_bytes,
            self.block_out_bytes,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Aggregates a bucket of points into one point stamped `bucket_start`.
    ///
    /// Returns `None` for an empty bucket.
    pub fn consolidate(
        bucket_start: i64,
        points: &[MetricPoint],
        policy: AggregationPolicy,
    ) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let field = |f: fn(&MetricPoint) -> f64, func: ConsolidationFn| {
            let values: Vec<f64> = points.iter().map(f).collect();
            func.apply(&values)
        };

        Some(Self {
            timestamp: bucket_start,
            cpu_percent: field(|p| p.cpu_percent, policy.usage),
            memory_used_bytes: field(|p| p.memory_used_bytes, policy.usage),
            memory_limit_bytes: field(|p| p.memory_limit_bytes, policy.memory_limit),
            network_in_bytes: field(|p| p.network_in_bytes, policy.usage),
            network_out_bytes: field(|p| p.network_out_bytes, policy.usage),
            block_in_bytes: field(|p| p.block_in_bytes, policy.usage),
            block_out_bytes: field(|p| p.block_out_bytes, policy.usage),
        })
    }
}
