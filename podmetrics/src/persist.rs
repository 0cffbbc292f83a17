//! JSON snapshots of the in-memory store.
//!
//! # File Layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "ladder_hash": 1234567890,
//!   "last_maintenance": 1700000000,
//!   "containers": {
//!     "abc123...": [[raw points], [m1 points], [m5], [m30], [daily]]
//!   }
//! }
//! ```
//!
//! Snapshots are written to `<path>.tmp` and renamed over `<path>`, so a crash
//! mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PersistError, Result};
use crate::point::MetricPoint;
use crate::schema::StoreConfig;
use crate::series::{ContainerSeries, SeriesRegistry, TierSeries};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A full copy of the store's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version, see [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// [`StoreConfig::stable_hash`] of the ladder the data was written under.
    pub ladder_hash: u64,
    /// Point time of the last maintenance pass.
    pub last_maintenance: Option<i64>,
    /// Per container, one point list per tier, finest first.
    pub containers: BTreeMap<String, Vec<Vec<MetricPoint>>>,
}

impl Snapshot {
    /// Copies the registry into a snapshot.
    pub fn capture(
        registry: &SeriesRegistry,
        config: &StoreConfig,
        last_maintenance: Option<i64>,
    ) -> Self {
        let containers = registry
            .iter()
            .map(|(id, series)| {
                let tiers = series.tiers().iter().map(TierSeries::to_vec).collect();
                (id.to_string(), tiers)
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            ladder_hash: config.stable_hash(),
            last_maintenance,
            containers,
        }
    }

    /// Rebuilds a registry, checking the snapshot against `config`.
    ///
    /// # Errors
    ///
    /// - [`PersistError::UnsupportedVersion`] for an unknown format version
    /// - [`PersistError::LadderMismatch`] if the ladder hash differs
    /// - [`PersistError::Corrupted`] if a container has the wrong tier count
    pub fn restore(self, config: &StoreConfig) -> Result<(SeriesRegistry, Option<i64>)> {
        if self.version != SNAPSHOT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            }
            .into());
        }

        let expected = config.stable_hash();
        if self.ladder_hash != expected {
            return Err(PersistError::LadderMismatch {
                expected,
                found: self.ladder_hash,
            }
            .into());
        }

        let mut registry = SeriesRegistry::new();
        for (id, tiers) in self.containers {
            if tiers.len() != config.tiers.len() {
                return Err(PersistError::Corrupted {
                    reason: format!(
                        "container {id} has {} tiers, expected {}",
                        tiers.len(),
                        config.tiers.len()
                    ),
                }
                .into());
            }
            let tiers = tiers.into_iter().map(TierSeries::from_points).collect();
            registry.insert(id, ContainerSeries::from_tiers(tiers));
        }

        Ok((registry, self.last_maintenance))
    }

    /// Writes the snapshot atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Serialize`] or [`PersistError::Write`].
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).map_err(|source| PersistError::Serialize { source })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| PersistError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = tmp_path(path);
        fs::write(&tmp, json).map_err(|source| PersistError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }

    /// Reads a snapshot from `path`. Returns `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Read`] or [`PersistError::Parse`].
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistError::Read {
                    path: path.to_path_buf(),
                    source,
                }
                .into());
            }
        };

        let snapshot = serde_json::from_slice(&bytes).map_err(|source| PersistError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    /// Total points across all containers and tiers.
    pub fn point_count(&self) -> usize {
        self.containers
            .values()
            .flat_map(|tiers| tiers.iter().map(Vec::len))
            .sum()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricsError;

    fn registry() -> SeriesRegistry {
        let mut registry = SeriesRegistry::new();
        let series = registry.get_or_create("abc", 5);
        for i in 0..3 {
            series.raw_mut().append(MetricPoint {
                cpu_percent: 12.5,
                ..MetricPoint::empty(i * 5)
            });
        }
        series.tiers_mut()[1].append(MetricPoint::empty(0));
        registry
    }

    #[test]
    fn test_capture_and_restore() {
        let config = StoreConfig::default();
        let original = registry();

        let snapshot = Snapshot::capture(&original, &config, Some(60));
        assert_eq!(snapshot.point_count(), 4);

        let (restored, last) = snapshot.restore(&config).unwrap();
        assert_eq!(restored, original);
        assert_eq!(last, Some(60));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.json");
        let snapshot = Snapshot::capture(&registry(), &StoreConfig::default(), None);

        snapshot.write(&path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());

        let back = Snapshot::read(&path).unwrap().unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Snapshot::read(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn test_read_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();

        let err = Snapshot::read(&path).unwrap_err();
        assert!(matches!(err, MetricsError::Persist(PersistError::Parse { .. })));
    }

    #[test]
    fn test_restore_rejects_version_and_ladder() {
        let config = StoreConfig::default();

        let mut snapshot = Snapshot::capture(&registry(), &config, None);
        snapshot.version = 99;
        let err = snapshot.restore(&config).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::Persist(PersistError::UnsupportedVersion { found: 99, .. })
        ));

        let snapshot = Snapshot::capture(&registry(), &config, None);
        let mut other = config.clone();
        other.tiers[0].interval = std::time::Duration::from_secs(10);
        let err = snapshot.restore(&other).unwrap_err();
        assert!(matches!(err, MetricsError::Persist(PersistError::LadderMismatch { .. })));
    }

    #[test]
    fn test_restore_rejects_wrong_tier_count() {
        let config = StoreConfig::default();
        let mut snapshot = Snapshot::capture(&registry(), &config, None);
        snapshot.containers.get_mut("abc").unwrap().pop();

        let err = snapshot.restore(&config).unwrap_err();
        assert!(matches!(err, MetricsError::Persist(PersistError::Corrupted { .. })));
    }
}
