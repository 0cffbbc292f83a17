//! Demo collector with an embedded podmetrics store.
//!
//! This binary runs the podmetrics sampling loop against a simulated
//! container runtime, persists the store to a snapshot file, and logs the live
//! point feed. Stop it with Ctrl-C; the snapshot is flushed on the way out.
//!
//! Inspect the result with `podmetrics info <snapshot>`.

mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use podmetrics::{Collector, CollectorConfig, MetricsStore, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::sim::SimulatedRuntime;

/// podmetrics-demo: sampling loop over a simulated container runtime.
#[derive(Parser)]
#[command(name = "podmetrics-demo", version, about)]
struct Cli {
    /// Path to the snapshot file.
    #[arg(long, default_value = "./podmetrics.json")]
    snapshot: PathBuf,

    /// Number of simulated containers at startup.
    #[arg(long, default_value = "5")]
    containers: usize,

    /// Seconds between sampling cycles, at most the raw tier interval (5).
    #[arg(long, default_value = "5")]
    poll_interval: u64,

    /// Seconds between reconciliations against the full container list.
    #[arg(long, default_value = "3600")]
    reconcile_interval: u64,

    /// Replace a container every N cycles (0 disables churn).
    #[arg(long, default_value = "0")]
    churn_every: u64,

    /// Scale CPU percentages by the host's online CPU count.
    #[arg(long)]
    per_cpu: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = Arc::new(MetricsStore::open(StoreConfig::with_snapshot(&cli.snapshot))?);
    tracing::info!(
        snapshot = %cli.snapshot.display(),
        restored = store.containers().len(),
        "store opened"
    );

    let cancel = CancellationToken::new();

    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        cancel_signal.cancel();
    });

    let (subscription, mut feed) = store.subscribe_channel(256);
    let feed_task = tokio::spawn(async move {
        while let Some((id, point)) = feed.recv().await {
            tracing::debug!(
                container_id = %id.get(..12).unwrap_or(&id),
                cpu = format_args!("{:.1}%", point.cpu_percent),
                mem_mib = format_args!("{:.1}", point.memory_used_bytes / 1_048_576.0),
                "sample"
            );
        }
    });

    let config = CollectorConfig {
        poll_interval: Duration::from_secs(cli.poll_interval.max(1)),
        reconcile_interval: Duration::from_secs(cli.reconcile_interval.max(1)),
        scale_by_online_cpus: cli.per_cpu,
    };
    let runtime = SimulatedRuntime::new(cli.containers, cli.churn_every, cli.poll_interval);
    let mut collector = Collector::new(runtime, store.clone(), config)?;

    collector.run(cancel).await;

    subscription.unsubscribe();
    feed_task.await?;

    for stats in store.container_stats() {
        tracing::info!(
            container_id = %stats.id.get(..12).unwrap_or(&stats.id),
            points = ?stats.points_per_tier,
            "stored series"
        );
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
