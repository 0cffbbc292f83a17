//! Turns raw runtime counters into [`MetricPoint`]s.
//!
//! The runtime reports CPU as cumulative nanosecond counters, so a CPU
//! percentage needs the previous sample of the same container. The
//! [`Normalizer`] keeps one [`CpuSnapshot`] per container for that; the
//! sampling loop drops snapshots of containers that went away.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::point::MetricPoint;

/// Receive/transmit counters of one network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
}

/// Read/write counters of one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCounters {
    /// Bytes read.
    pub read_bytes: u64,
    /// Bytes written.
    pub write_bytes: u64,
}

/// One stats reading for a container, as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    /// Full container id.
    pub container_id: String,
    /// Cumulative CPU time used by the container.
    pub cpu_time_ns: u64,
    /// Cumulative CPU time of the whole host.
    pub system_time_ns: u64,
    /// CPUs online on the host, when the runtime reports it.
    pub online_cpus: Option<u32>,
    /// Memory in use.
    pub memory_usage_bytes: u64,
    /// Memory limit.
    pub memory_limit_bytes: u64,
    /// Per-interface network counters.
    pub networks: Vec<InterfaceCounters>,
    /// Per-device block I/O counters.
    pub block_devices: Vec<BlockCounters>,
}

/// The CPU counters of the previous sample of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    /// Container CPU time.
    pub cpu_time_ns: u64,
    /// Host CPU time.
    pub system_time_ns: u64,
}

/// Normalizer options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Multiply the CPU share by the online CPU count, Docker style.
    ///
    /// Off by default: the percentage is then a share of the whole host.
    /// Either way the result is clamped to 100.
    pub scale_by_online_cpus: bool,
}

/// Stateful converter from [`RawSample`] to [`MetricPoint`].
#[derive(Debug, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
    previous: HashMap<String, CpuSnapshot>,
}

impl Normalizer {
    /// Creates a normalizer with no history.
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            previous: HashMap::new(),
        }
    }

    /// Converts a sample into a point stamped `timestamp`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use podmetrics::normalize::{Normalizer, NormalizerConfig, RawSample};
    ///
    /// let mut normalizer = Normalizer::new(NormalizerConfig::default());
    /// let mut sample = RawSample {
    ///     container_id: "abc".to_string(),
    ///     cpu_time_ns: 1_000,
    ///     system_time_ns: 10_000,
    ///     ..RawSample::default()
    /// };
    ///
    /// // First sample: no previous counters yet.
    /// assert_eq!(normalizer.normalize(&sample, 0).cpu_percent, 0.0);
    ///
    /// sample.cpu_time_ns = 1_500;
    /// sample.system_time_ns = 12_000;
    /// assert_eq!(normalizer.normalize(&sample, 5).cpu_percent, 25.0);
    /// ```
    pub fn normalize(&mut self, sample: &RawSample, timestamp: i64) -> MetricPoint {
        let current = CpuSnapshot {
            cpu_time_ns: sample.cpu_time_ns,
            system_time_ns: sample.system_time_ns,
        };
        let previous = self.previous.insert(sample.container_id.clone(), current);

        let factor = match (self.config.scale_by_online_cpus, sample.online_cpus) {
            (true, Some(cpus)) if cpus > 0 => f64::from(cpus),
            _ => 1.0,
        };

        let (rx, tx) = sample
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), n| {
                (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
            });
        let (read, write) = sample
            .block_devices
            .iter()
            .fold((0u64, 0u64), |(r, w), b| {
                (r.saturating_add(b.read_bytes), w.saturating_add(b.write_bytes))
            });

        MetricPoint {
            timestamp,
            cpu_percent: cpu_percent(previous, current, factor),
            memory_used_bytes: as_f64(sample.memory_usage_bytes),
            memory_limit_bytes: as_f64(sample.memory_limit_bytes),
            network_in_bytes: as_f64(rx),
            network_out_bytes: as_f64(tx),
            block_in_bytes: as_f64(read),
            block_out_bytes: as_f64(write),
        }
    }

    /// Drops the history of every container not in `active`. Returns how many.
    pub fn retain(&mut self, active: &HashSet<String>) -> usize {
        let before = self.previous.len();
        self.previous.retain(|id, _| active.contains(id));
        before - self.previous.len()
    }

    /// Drops the history of one container.
    pub fn forget(&mut self, container_id: &str) -> bool {
        self.previous.remove(container_id).is_some()
    }

    /// Number of containers with CPU history.
    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

/// CPU share between two snapshots, 0 whenever the deltas are unusable.
fn cpu_percent(previous: Option<CpuSnapshot>, current: CpuSnapshot, factor: f64) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    if previous.system_time_ns == 0 {
        return 0.0;
    }

    // Counters reset when a container restarts.
    let (Some(cpu_delta), Some(system_delta)) = (
        current.cpu_time_ns.checked_sub(previous.cpu_time_ns),
        current.system_time_ns.checked_sub(previous.system_time_ns),
    ) else {
        return 0.0;
    };
    if system_delta == 0 {
        return 0.0;
    }

    (as_f64(cpu_delta) / as_f64(system_delta) * 100.0 * factor).clamp(0.0, 100.0)
}

#[allow(clippy::cast_precision_loss)] // byte counters stay well below 2^53
fn as_f64(value: u64) -> f64 {
    value as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, cpu: u64, system: u64) -> RawSample {
        RawSample {
            container_id: id.to_string(),
            cpu_time_ns: cpu,
            system_time_ns: system,
            ..RawSample::default()
        }
    }

    #[test]
    fn test_first_sample_has_zero_cpu() {
        let mut normalizer = Normalizer::default();
        let point = normalizer.normalize(&sample("a", 5_000, 10_000), 0);
        assert_eq!(point.cpu_percent, 0.0);
        assert_eq!(normalizer.tracked(), 1);
    }

    #[test]
    fn test_cpu_from_deltas_is_clamped() {
        let mut normalizer = Normalizer::default();
        normalizer.normalize(&sample("a", 0, 1_000), 0);

        let point = normalizer.normalize(&sample("a", 100, 2_000), 5);
        assert!((point.cpu_percent - 10.0).abs() < 1e-9);

        let point = normalizer.normalize(&sample("a", 5_000, 3_000), 10);
        assert_eq!(point.cpu_percent, 100.0);
    }

    #[test]
    fn test_counter_reset_and_zero_system_yield_zero() {
        let mut normalizer = Normalizer::default();
        normalizer.normalize(&sample("a", 0, 0), 0);
        // Previous system time of zero.
        assert_eq!(normalizer.normalize(&sample("a", 100, 1_000), 5).cpu_percent, 0.0);

        // Container restarted: cpu counter went backwards.
        assert_eq!(normalizer.normalize(&sample("a", 10, 2_000), 10).cpu_percent, 0.0);

        // No host progress.
        assert_eq!(normalizer.normalize(&sample("a", 20, 2_000), 15).cpu_percent, 0.0);
    }

    #[test]
    fn test_online_cpu_scaling() {
        let mut normalizer = Normalizer::new(NormalizerConfig {
            scale_by_online_cpus: true,
        });
        let mut s = sample("a", 0, 1_000);
        s.online_cpus = Some(4);
        normalizer.normalize(&s, 0);

        s.cpu_time_ns = 100;
        s.system_time_ns = 2_000;
        assert!((normalizer.normalize(&s, 5).cpu_percent - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_io_counters_are_summed() {
        let mut normalizer = Normalizer::default();
        let raw = RawSample {
            container_id: "a".to_string(),
            memory_usage_bytes: 1_024,
            memory_limit_bytes: 4_096,
            networks: vec![
                InterfaceCounters { rx_bytes: 10, tx_bytes: 1 },
                InterfaceCounters { rx_bytes: 5, tx_bytes: 2 },
            ],
            block_devices: vec![BlockCounters { read_bytes: 7, write_bytes: 9 }],
            ..RawSample::default()
        };

        let point = normalizer.normalize(&raw, 42);
        assert_eq!(point.timestamp, 42);
        assert_eq!(point.memory_used_bytes, 1_024.0);
        assert_eq!(point.memory_limit_bytes, 4_096.0);
        assert_eq!(point.network_in_bytes, 15.0);
        assert_eq!(point.network_out_bytes, 3.0);
        assert_eq!(point.block_in_bytes, 7.0);
        assert_eq!(point.block_out_bytes, 9.0);
    }

    #[test]
    fn test_retain_and_forget() {
        let mut normalizer = Normalizer::default();
        for id in ["a", "b", "c"] {
            normalizer.normalize(&sample(id, 0, 1), 0);
        }

        let active: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert_eq!(normalizer.retain(&active), 1);
        assert!(normalizer.forget("a"));
        assert!(!normalizer.forget("a"));
        assert_eq!(normalizer.tracked(), 1);
    }
}
