//! CLI for podmetrics snapshots.
//!
//! Provides commands for inspecting, querying, and benchmarking podmetrics
//! stores.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use podmetrics::persist::Snapshot;
use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};

/// podmetrics: layered container metrics store CLI.
#[derive(Parser)]
#[command(name = "podmetrics", version, about)]
struct Cli {
    /// Store configuration as JSON. Defaults to the standard five-tier ladder.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display snapshot metadata, tiers, and per-container point counts.
    Info {
        /// Path to the snapshot file.
        snapshot: PathBuf,
    },

    /// Query one container's series from a snapshot.
    Query {
        /// Path to the snapshot file.
        snapshot: PathBuf,

        /// Container id or unique id prefix.
        container: String,

        /// Time range: 1h, 24h, 7d, 30d or 1y.
        #[arg(long, default_value = "1h")]
        range: TimeRange,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run an ingestion microbenchmark.
    Bench {
        /// Number of points to push.
        #[arg(long, default_value = "1000000")]
        points: u64,

        /// Number of containers to spread them over.
        #[arg(long, default_value = "30")]
        containers: u32,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with metadata and points.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Info { snapshot } => cmd_info(config, &snapshot),
        Commands::Query {
            snapshot,
            container,
            range,
            format,
        } => cmd_query(config, &snapshot, &container, range, &format),
        Commands::Bench { points, containers } => cmd_bench(config, points, containers),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Reads a JSON store configuration, or returns the default ladder.
fn load_config(path: Option<&Path>) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(StoreConfig::default());
    };
    let data = std::fs::read_to_string(path)?;
    let config: StoreConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

/// Implements `podmetrics info <snapshot>`.
fn cmd_info(config: StoreConfig, snapshot_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::read(snapshot_path)?
        .ok_or_else(|| format!("No snapshot found at '{}'", snapshot_path.display()))?;
    let file_size = std::fs::metadata(snapshot_path)?.len();

    println!("Snapshot: {}", snapshot_path.display());
    println!("  Version: {}", snapshot.version);
    println!("  Ladder hash: {:016x}", snapshot.ladder_hash);
    if snapshot.ladder_hash != config.stable_hash() {
        println!(
            "  WARNING: written under a different ladder (configured {:016x})",
            config.stable_hash()
        );
    }
    match snapshot.last_maintenance {
        Some(ts) => println!("  Last maintenance: {ts}"),
        None => println!("  Last maintenance: never"),
    }
    println!("  Size: {} ({file_size} bytes)", format_bytes(file_size));
    println!();

    println!("Tiers: {}", config.tiers.len());
    for (i, tier) in config.tiers.iter().enumerate() {
        let range = TimeRange::ALL.get(i).map_or("-", |r| r.as_str());
        println!(
            "  Tier {i} ({}): interval={}, retention={}, range={range}",
            tier.name,
            format_duration_secs(tier.interval.as_secs()),
            format_duration_secs(tier.retention.as_secs()),
        );
    }
    println!();

    println!(
        "Containers: {} ({} points)",
        snapshot.containers.len(),
        snapshot.point_count()
    );
    for (id, tiers) in &snapshot.containers {
        let counts: Vec<String> = tiers.iter().map(|t| t.len().to_string()).collect();
        let newest = tiers
            .first()
            .and_then(|raw| raw.last())
            .map_or_else(|| "-".to_string(), |p| p.timestamp.to_string());
        println!("  - {} points=[{}] newest={newest}", short_id(id), counts.join(", "));
    }

    Ok(())
}

/// Implements `podmetrics query <snapshot> <container>`.
fn cmd_query(
    mut config: StoreConfig,
    snapshot_path: &Path,
    container: &str,
    range: TimeRange,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::read(snapshot_path)?
        .ok_or_else(|| format!("No snapshot found at '{}'", snapshot_path.display()))?;
    config.snapshot_path = None;
    let store = MetricsStore::from_snapshot(config, snapshot)?;

    let result = store.query_detailed(container, range);
    let container_id = result
        .container_id()
        .map(str::to_string)
        .ok_or_else(|| format!("Container '{container}' not found or ambiguous"))?;
    let tier_used = result.tier_used();
    let data: Vec<MetricPoint> = result.collect_all();

    match format {
        OutputFormat::Csv => {
            println!(
                "# container={container_id}, range={range}, tier={tier_used}, points={}",
                data.len()
            );
            println!("timestamp,cpu_percent,memory_used_bytes,memory_limit_bytes,network_in_bytes,network_out_bytes,block_in_bytes,block_out_bytes");
            for p in &data {
                println!(
                    "{},{},{},{},{},{},{},{}",
                    p.timestamp,
                    p.cpu_percent,
                    p.memory_used_bytes,
                    p.memory_limit_bytes,
                    p.network_in_bytes,
                    p.network_out_bytes,
                    p.block_in_bytes,
                    p.block_out_bytes
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "container": container_id,
                "range": range,
                "tier": tier_used,
                "count": data.len(),
                "data": data,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `podmetrics bench`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    config: StoreConfig,
    points: u64,
    container_count: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if container_count == 0 {
        return Err("--containers must be at least 1".into());
    }

    println!("podmetrics ingestion benchmark");
    println!("  Points: {points}");
    println!("  Containers: {container_count}");
    println!();

    let store = MetricsStore::open(StoreConfig {
        snapshot_path: None,
        ..config
    })?;
    let ids: Vec<String> = (0..container_count).map(|i| format!("{i:064x}")).collect();
    let step = store.config().tiers[0].interval_secs();

    println!("Pushing {points} points across {container_count} containers...");

    let base_time = 1_700_000_000i64;
    let points_per_container = points / u64::from(container_count);

    let start = Instant::now();

    for n in 0..points_per_container {
        let ts = base_time + n as i64 * step;
        for (i, id) in ids.iter().enumerate() {
            store.push(
                id,
                MetricPoint {
                    cpu_percent: (i % 100) as f64,
                    ..MetricPoint::empty(ts)
                },
            );
        }
    }

    let elapsed = start.elapsed();
    let total_writes = points_per_container * u64::from(container_count);
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes.max(1) as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    let retained: usize = store
        .container_stats()
        .iter()
        .map(|s| s.points_per_tier.iter().sum::<usize>())
        .sum();

    println!();
    println!("Results:");
    println!("  Total pushes: {total_writes}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/push");
    println!("  Throughput: {writes_per_sec:.0} pushes/sec");
    println!("  Points retained across tiers: {retained}");
    println!();

    Ok(())
}

/// Shortens a 64-char container id the way the runtime's CLI does.
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
