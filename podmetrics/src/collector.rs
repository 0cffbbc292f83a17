//! The sampling loop and container reconciliation.
//!
//! A [`Collector`] polls a [`SampleSource`] on a fixed cadence:
//!
//! ```text
//! list running ─► fetch stats (concurrently) ─► normalize ─► push
//!                                                              │
//!            save_if_due ◄── reconcile (hourly, all=true) ◄────┘
//! ```
//!
//! Cycles never overlap: the next sleep starts once the current cycle is
//! done. A failed listing skips the cycle; a failed stats fetch skips that
//! container. Neither is retried within the cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SchemaError, SourceError};
use crate::normalize::{Normalizer, NormalizerConfig, RawSample};
use crate::store::MetricsStore;

/// Where container ids and stats come from.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Container ids. `all = false` lists running containers only, `all =
    /// true` also includes stopped ones.
    async fn list_containers(&self, all: bool) -> std::result::Result<Vec<String>, SourceError>;

    /// One stats reading for a container.
    async fn container_stats(&self, id: &str) -> std::result::Result<RawSample, SourceError>;
}

#[async_trait]
impl<T: SampleSource + ?Sized> SampleSource for Arc<T> {
    async fn list_containers(&self, all: bool) -> std::result::Result<Vec<String>, SourceError> {
        (**self).list_containers(all).await
    }

    async fn container_stats(&self, id: &str) -> std::result::Result<RawSample, SourceError> {
        (**self).container_stats(id).await
    }
}

/// Sampling loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Time between the end of one cycle and the start of the next.
    #[serde(with = "crate::schema::duration_serde")]
    pub poll_interval: Duration,
    /// Minimum time between reconciliations against the full container list.
    #[serde(with = "crate::schema::duration_serde")]
    pub reconcile_interval: Duration,
    /// See [`NormalizerConfig::scale_by_online_cpus`].
    pub scale_by_online_cpus: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(3600),
            scale_by_online_cpus: false,
        }
    }
}

impl CollectorConfig {
    /// Validates the cadences.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ZeroInterval`] if either interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(SchemaError::ZeroInterval {
                setting: "poll_interval",
            }
            .into());
        }
        if self.reconcile_interval.is_zero() {
            return Err(SchemaError::ZeroInterval {
                setting: "reconcile_interval",
            }
            .into());
        }
        Ok(())
    }
}

/// Outcome of one sampling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Containers sampled and pushed.
    pub sampled: usize,
    /// Containers whose stats could not be fetched.
    pub failed: usize,
    /// Containers purged by reconciliation in this cycle.
    pub purged: usize,
}

/// Drives sampling, reconciliation and periodic saves for one store.
pub struct Collector<S> {
    source: S,
    store: Arc<MetricsStore>,
    normalizer: Normalizer,
    config: CollectorConfig,
    last_reconcile: Option<i64>,
}

impl<S: SampleSource> Collector<S> {
    /// Creates a collector.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, or
    /// [`SchemaError::PollSlowerThanRaw`] if it polls less often than the
    /// store's raw tier expects.
    pub fn new(source: S, store: Arc<MetricsStore>, config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        if let Some(raw) = store.config().tiers.first()
            && config.poll_interval > raw.interval
        {
            return Err(SchemaError::PollSlowerThanRaw {
                poll: config.poll_interval,
                raw: raw.interval,
            }
            .into());
        }
        Ok(Self {
            source,
            store,
            normalizer: Normalizer::new(NormalizerConfig {
                scale_by_online_cpus: config.scale_by_online_cpus,
            }),
            config,
            last_reconcile: None,
        })
    }

    /// Runs one cycle with `now` as the point timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the running containers cannot be listed;
    /// nothing is pushed in that case.
    pub async fn poll_once(&mut self, now: i64) -> Result<CycleReport> {
        let ids = self.source.list_containers(false).await?;
        let mut report = CycleReport::default();

        let fetches = ids.iter().map(|id| self.source.container_stats(id));
        let results = join_all(fetches).await;

        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(sample) => {
                    let point = self.normalizer.normalize(&sample, now);
                    self.store.push(&sample.container_id, point);
                    report.sampled += 1;
                }
                Err(e) => {
                    warn!(container_id = %id, error = %e, "skipping container this cycle");
                    report.failed += 1;
                }
            }
        }

        report.purged = self.reconcile_if_due(now).await;

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save_if_due()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "snapshot save failed, keeping in-memory state"),
            Err(e) => warn!(error = %e, "snapshot save task failed"),
        }

        debug!(
            now,
            sampled = report.sampled,
            failed = report.failed,
            purged = report.purged,
            "sampling cycle finished"
        );
        Ok(report)
    }

    /// Reconciles on the first cycle, then once per `reconcile_interval`
    /// counted from the last successful reconciliation.
    async fn reconcile_if_due(&mut self, now: i64) -> usize {
        let interval = secs_i64(self.config.reconcile_interval);
        if self.last_reconcile.is_some_and(|last| now - last < interval) {
            return 0;
        }
        match self.try_reconcile().await {
            Ok(purged) => {
                self.last_reconcile = Some(now);
                purged
            }
            Err(e) => {
                warn!(error = %e, "cannot list containers, skipping reconciliation");
                0
            }
        }
    }

    /// Purges stored series and CPU history of containers that no longer exist.
    ///
    /// A failed listing purges nothing.
    pub async fn reconcile(&mut self) -> usize {
        self.try_reconcile().await.unwrap_or_else(|e| {
            warn!(error = %e, "cannot list containers, skipping reconciliation");
            0
        })
    }

    async fn try_reconcile(&mut self) -> std::result::Result<usize, SourceError> {
        let active: HashSet<String> = self.source.list_containers(true).await?.into_iter().collect();

        let purged = self.store.purge_containers(&active);
        let forgotten = self.normalizer.retain(&active);
        debug!(purged, forgotten, "reconciled against container list");
        Ok(purged)
    }

    /// Polls until `cancel` fires, then forces a final save.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            poll_interval = ?self.config.poll_interval,
            reconcile_interval = ?self.config.reconcile_interval,
            "collector started"
        );

        loop {
            if let Err(e) = self.poll_once(unix_now()).await {
                warn!(error = %e, "sampling cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("collector stopping, flushing snapshot");
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.force_save()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "final snapshot save failed"),
            Err(e) => warn!(error = %e, "final snapshot save task failed"),
        }
    }

    /// The store this collector feeds.
    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, secs_i64)
}

#[allow(clippy::cast_possible_wrap)] // seconds since the epoch fit in i64
fn secs_i64(duration: Duration) -> i64 {
    duration.as_secs() as i64
}
