//! The layered metrics store.
//!
//! # Design
//!
//! [`MetricsStore`] is the central coordinator:
//! - owns the [`SeriesRegistry`] behind one `RwLock`; pushes, maintenance and
//!   purges take the write lock, queries the read lock
//! - runs rollup and prune from the push path, gated by point time
//! - fans new points out to subscribers after releasing the write lock
//! - snapshots itself to a JSON file when a path is configured
//!
//! Ingestion never fails. Out-of-order and non-finite points are dropped and
//! logged at debug level.
//!
//! # Example Usage
//!
//! ```rust
//! use std::collections::HashSet;
//! use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetricsStore::open(StoreConfig::default())?;
//!
//! for i in 0..12 {
//!     store.push("web", MetricPoint { cpu_percent: 50.0, ..MetricPoint::empty(i * 5) });
//! }
//! assert_eq!(store.query("web", TimeRange::OneHour).len(), 12);
//!
//! let active: HashSet<String> = HashSet::new();
//! assert_eq!(store.purge_containers(&active), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::consolidate::{ConsolidationEngine, ConsolidationReport};
use crate::error::Result;
use crate::persist::Snapshot;
use crate::point::MetricPoint;
use crate::query::{QueryResult, TimeRange};
use crate::schema::StoreConfig;
use crate::series::SeriesRegistry;
use crate::subscribe::{Subscription, SubscriptionBus};

/// Point counts for one stored container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStats {
    /// Full container id.
    pub id: String,
    /// Number of points held in each tier, finest first.
    pub points_per_tier: Vec<usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    registry: SeriesRegistry,
    last_maintenance: Option<i64>,
}

/// Multi-resolution metrics store shared across threads as `Arc<MetricsStore>`.
#[derive(Debug)]
pub struct MetricsStore {
    config: StoreConfig,
    engine: ConsolidationEngine,
    state: RwLock<StoreState>,
    bus: Arc<SubscriptionBus>,
    last_save: Mutex<Option<Instant>>,
}

impl MetricsStore {
    /// Creates a store, restoring the configured snapshot when one exists.
    ///
    /// A snapshot that cannot be read or does not match the ladder is logged
    /// and ignored; the store then starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`](crate::error::SchemaError) if the configuration
    /// is invalid.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::empty(config)?;

        if let Err(e) = store.load() {
            warn!(error = %e, "ignoring unusable snapshot, starting empty");
        }

        Ok(store)
    }

    /// Creates a store holding the series of an already-read snapshot.
    ///
    /// Unlike [`open`](Self::open), an incompatible snapshot is an error. The
    /// configured `snapshot_path` is not read.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`](crate::error::SchemaError) if the configuration
    /// is invalid, or [`PersistError`](crate::error::PersistError) if the
    /// snapshot does not match the ladder.
    pub fn from_snapshot(config: StoreConfig, snapshot: Snapshot) -> Result<Self> {
        let store = Self::empty(config)?;
        let (registry, last_maintenance) = snapshot.restore(&store.config)?;
        *store.write_state() = StoreState {
            registry,
            last_maintenance,
        };
        Ok(store)
    }

    fn empty(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: ConsolidationEngine::new(&config),
            config,
            state: RwLock::new(StoreState::default()),
            bus: SubscriptionBus::new(),
            last_save: Mutex::new(None),
        })
    }

    /// Ingests one raw point for a container.
    ///
    /// Runs a maintenance pass first if one is due at `point.timestamp`, then
    /// notifies subscribers. Subscribers run on this thread and must not push.
    pub fn push(&self, container_id: &str, point: MetricPoint) {
        if container_id.is_empty() {
            warn!("dropping point with empty container id");
            return;
        }
        if !point.is_finite() {
            debug!(container_id, timestamp = point.timestamp, "dropping non-finite point");
            return;
        }

        // Taken before the write lock so that fan-out order follows push order.
        let dispatch = self.bus.begin_dispatch();

        {
            let mut state = self.write_state();
            let tier_count = self.config.tiers.len();

            let series = state.registry.get_or_create(container_id, tier_count);
            if !series.raw_mut().append(point) {
                debug!(
                    container_id,
                    timestamp = point.timestamp,
                    "dropping point not newer than the last raw point"
                );
                return;
            }

            let due = state
                .last_maintenance
                .is_none_or(|last| point.timestamp - last >= self.config.maintenance_secs());
            if due {
                self.maintain_locked(&mut state, point.timestamp);
            }
        }

        dispatch.publish(container_id, &point);
    }

    /// Runs one rollup and prune pass with `now` as the retention reference.
    pub fn maintain(&self, now: i64) -> ConsolidationReport {
        let mut state = self.write_state();
        self.maintain_locked(&mut state, now)
    }

    fn maintain_locked(&self, state: &mut StoreState, now: i64) -> ConsolidationReport {
        let report = self.engine.run(&mut state.registry, now);
        state.last_maintenance = Some(now);
        if !report.is_empty() {
            debug!(
                now,
                buckets_emitted = report.buckets_emitted,
                points_pruned = report.points_pruned,
                "maintenance pass"
            );
        }
        report
    }

    /// Points of the tier serving `range`, oldest first.
    ///
    /// An unknown or ambiguous key yields an empty vector.
    pub fn query(&self, container_id: &str, range: TimeRange) -> Vec<MetricPoint> {
        self.query_tier(container_id, range.tier_index())
    }

    /// Points of one tier by index, oldest first.
    pub fn query_tier(&self, container_id: &str, tier_index: usize) -> Vec<MetricPoint> {
        self.read_state()
            .registry
            .lookup(container_id)
            .and_then(|series| series.tier(tier_index))
            .map(|tier| tier.to_vec())
            .unwrap_or_default()
    }

    /// Like [`query`](Self::query), also reporting the resolved id and tier.
    pub fn query_detailed(&self, container_id: &str, range: TimeRange) -> QueryResult {
        let state = self.read_state();
        let tier_index = range.tier_index();

        match state.registry.resolve(container_id) {
            Some(id) => {
                let points = state
                    .registry
                    .lookup(id)
                    .and_then(|series| series.tier(tier_index))
                    .map(|tier| tier.to_vec())
                    .unwrap_or_default();
                QueryResult::new(Some(id.to_string()), tier_index, points)
            }
            None => QueryResult::new(None, tier_index, Vec::new()),
        }
    }

    /// Newest raw point of every container.
    pub fn latest_all(&self) -> HashMap<String, MetricPoint> {
        self.read_state()
            .registry
            .iter()
            .filter_map(|(id, series)| series.raw().latest().map(|p| (id.to_string(), *p)))
            .collect()
    }

    /// Ids of all stored containers, sorted.
    pub fn containers(&self) -> Vec<String> {
        self.read_state()
            .registry
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Per-container point counts, sorted by id.
    pub fn container_stats(&self) -> Vec<ContainerStats> {
        self.read_state()
            .registry
            .iter()
            .map(|(id, series)| ContainerStats {
                id: id.to_string(),
                points_per_tier: series.points_per_tier(),
            })
            .collect()
    }

    /// Resolves a possibly truncated key to a stored container id.
    pub fn resolve(&self, key: &str) -> Option<String> {
        self.read_state().registry.resolve(key).map(str::to_string)
    }

    /// Registers a listener for points pushed from now on.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str, &MetricPoint) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Registers a bounded mailbox for points pushed from now on.
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<(String, MetricPoint)>) {
        self.bus.subscribe_channel(capacity)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Removes every container whose id is not in `active`. Returns how many.
    pub fn purge_containers(&self, active: &HashSet<String>) -> usize {
        let removed = self
            .write_state()
            .registry
            .retain(|id| active.contains(id));

        if !removed.is_empty() {
            info!(count = removed.len(), "purged series of removed containers");
            debug!(ids = ?removed, "purged containers");
        }
        removed.len()
    }

    /// Replaces the in-memory series with the configured snapshot.
    ///
    /// Returns `false` when no snapshot path is configured or the file does
    /// not exist; the in-memory state is then left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`](crate::error::PersistError) if the snapshot
    /// cannot be read or does not match this store's ladder.
    pub fn load(&self) -> Result<bool> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(false);
        };
        let Some(snapshot) = Snapshot::read(path)? else {
            return Ok(false);
        };

        let (registry, last_maintenance) = snapshot.restore(&self.config)?;
        let containers = registry.len();
        *self.write_state() = StoreState {
            registry,
            last_maintenance,
        };

        info!(path = %path.display(), containers, "loaded snapshot");
        Ok(true)
    }

    /// Saves a snapshot unless one was saved within `save_interval`.
    ///
    /// Returns whether a snapshot was written.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`](crate::error::PersistError) if writing fails.
    pub fn save_if_due(&self) -> Result<bool> {
        if self.config.snapshot_path.is_none() {
            return Ok(false);
        }

        let due = self
            .last_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none_or(|at| at.elapsed() >= self.config.save_interval);
        if !due {
            return Ok(false);
        }

        self.force_save()?;
        Ok(true)
    }

    /// Saves a snapshot now. A no-op without a snapshot path.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`](crate::error::PersistError) if writing fails.
    pub fn force_save(&self) -> Result<()> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(());
        };

        let snapshot = {
            let state = self.read_state();
            Snapshot::capture(&state.registry, &self.config, state.last_maintenance)
        };
        snapshot.write(path)?;

        *self.last_save.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        debug!(
            path = %path.display(),
            containers = snapshot.containers.len(),
            points = snapshot.point_count(),
            "saved snapshot"
        );
        Ok(())
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
