//! Demonstration of the tier ladder in podmetrics.
//!
//! This example pushes two hours of 5-second samples for one container and
//! shows how rollup fills the coarser tiers while retention trims the finer
//! ones.

use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = StoreConfig::default();
    for tier in &config.tiers {
        println!(
            "Tier {:>5}: every {:>6}s, kept {:>9}s",
            tier.name,
            tier.interval_secs(),
            tier.retention_secs()
        );
    }

    let store = MetricsStore::open(config)?;
    let container = "4f2a9c81d3e7b6a5f0c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9d0e1f2a3";

    // 2024-01-01 00:00:00 UTC
    let base_time = 1_704_067_200i64;
    println!("\nPushing two hours of samples:");

    for i in 0u32..1440 {
        let timestamp = base_time + i64::from(i) * 5;

        // Sinusoidal load with periodic spikes
        let fi = f64::from(i);
        let cpu = if i % 60 == 0 {
            95.0
        } else {
            35.0 + 15.0 * (fi * 0.01).sin()
        };

        store.push(
            container,
            MetricPoint {
                cpu_percent: cpu,
                memory_used_bytes: 200.0 * 1_048_576.0 + fi * 4096.0,
                memory_limit_bytes: 512.0 * 1_048_576.0,
                ..MetricPoint::empty(timestamp)
            },
        );

        if i % 240 == 0 {
            println!("  t+{:>4}s: CPU={cpu:.1}%", i * 5);
        }
    }

    println!("\nQuerying by short id {}:", &container[..12]);
    for range in TimeRange::ALL {
        let result = store.query_detailed(&container[..12], range);
        let tier = result.tier_used();
        let (oldest, newest) = result.available_range();
        let points: Vec<_> = result.collect();
        let mean = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| p.cpu_percent).sum::<f64>() / f64::from(u32::try_from(points.len())?)
        };
        println!(
            "  {range} (tier {tier}): {:>4} points, oldest={:?}, newest={:?}, mean cpu={mean:.1}%",
            points.len(),
            oldest.map(|t| t - base_time),
            newest.map(|t| t - base_time),
        );
    }

    Ok(())
}
