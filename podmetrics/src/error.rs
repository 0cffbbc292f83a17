//! Error types for the podmetrics store and sampling loop.
//!
//! Nothing on the ingestion path returns these to the caller: `push` swallows
//! and logs. They surface from configuration validation, snapshot persistence
//! and the sample source boundary.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all podmetrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Error during store or tier configuration validation.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error while saving or loading a snapshot.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Error returned by the container runtime sample source.
    #[error("sample source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors that can occur during tier ladder or store configuration validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A tier configuration is invalid.
    #[error("invalid tier '{tier}': {reason}")]
    InvalidTierConfig {
        /// Name of the offending tier.
        tier: String,
        /// Description of what makes the tier configuration invalid.
        reason: String,
    },

    /// The ladder does not have one tier per query range.
    #[error("expected {expected} tiers, found {found}")]
    WrongTierCount {
        /// Number of tiers the ladder must have.
        expected: usize,
        /// Number of tiers configured.
        found: usize,
    },

    /// Tiers are not properly ordered by resolution.
    #[error("tiers must be ordered from highest resolution to lowest resolution")]
    TiersNotOrdered,

    /// A coarser tier's interval is not a whole multiple of its source tier.
    #[error("tier interval {target:?} is not a multiple of source interval {source_interval:?}")]
    IntervalNotMultiple {
        /// The source (finer) tier interval.
        source_interval: Duration,
        /// The target (coarser) tier interval.
        target: Duration,
    },

    /// Completeness ratio out of range.
    #[error("invalid completeness ratio {ratio}: must be in (0, 1]")]
    InvalidCompleteness {
        /// The rejected ratio.
        ratio: f64,
    },

    /// Sampling is slower than the raw tier, so no rollup bucket would ever
    /// reach its completeness threshold.
    #[error("poll interval {poll:?} is longer than the raw tier interval {raw:?}")]
    PollSlowerThanRaw {
        /// The configured poll interval.
        poll: Duration,
        /// The store's raw tier interval.
        raw: Duration,
    },

    /// A cadence setting is zero.
    #[error("{setting} cannot be zero")]
    ZeroInterval {
        /// The name of the setting.
        setting: &'static str,
    },
}

/// Errors that can occur while saving or loading a store snapshot.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Failed to read the snapshot file.
    #[error("failed to read snapshot '{}': {source}", path.display())]
    Read {
        /// The snapshot path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or rename the snapshot file.
    #[error("failed to write snapshot '{}': {source}", path.display())]
    Write {
        /// The snapshot path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON for the expected layout.
    #[error("failed to parse snapshot '{}': {source}", path.display())]
    Parse {
        /// The snapshot path.
        path: std::path::PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize the in-memory state.
    #[error("failed to serialize snapshot: {source}")]
    Serialize {
        /// The underlying JSON serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot written by an incompatible format version.
    #[error("unsupported snapshot version: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// The version this build writes.
        expected: u32,
        /// The version found on disk.
        found: u32,
    },

    /// Snapshot parsed but its contents do not fit the configured ladder.
    #[error("corrupted snapshot: {reason}")]
    Corrupted {
        /// Description of the inconsistency.
        reason: String,
    },

    /// Snapshot was written under a different tier ladder.
    #[error("snapshot ladder hash {found:x} does not match configured ladder {expected:x}")]
    LadderMismatch {
        /// Hash of the configured ladder.
        expected: u64,
        /// Hash stored in the snapshot.
        found: u64,
    },
}

/// Errors reported by a [`SampleSource`](crate::collector::SampleSource).
#[derive(Error, Debug)]
pub enum SourceError {
    /// The runtime could not be reached at all.
    #[error("container runtime unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },

    /// Stats for a single container could not be fetched.
    #[error("stats for container {container_id} unavailable: {reason}")]
    Stats {
        /// The container whose stats failed.
        container_id: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, MetricsError>`.
pub type Result<T> = std::result::Result<T, MetricsError>;
