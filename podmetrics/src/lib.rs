//! # podmetrics
//!
//! Layered in-memory metrics store for Podman containers.
//!
//! podmetrics samples container resource usage, keeps it at five resolutions
//! with bounded retention, and serves it to dashboards: a 5-second tier for
//! the last hour down to a daily tier for the last year. Think rrdtool's
//! storage philosophy applied to container stats.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Rollup and retention run inline with ingestion, gated by point time
//! - Bounded storage per container, set by the tier ladder, not by uptime
//! - Truncated container ids resolve deterministically
//! - Live subscribers that can never stall ingestion
//! - Best-effort JSON snapshots with a forced flush on shutdown
//!
//! ## Quick Start
//!
//! ```rust
//! use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetricsStore::open(StoreConfig::default())?;
//!
//! let _sub = store.subscribe(|id, point| {
//!     println!("{id}: {:.1}% cpu", point.cpu_percent);
//! });
//!
//! // One hour of 5-second samples.
//! for i in 0..720 {
//!     store.push("4f2a9c", MetricPoint { cpu_percent: 12.0, ..MetricPoint::empty(i * 5) });
//! }
//!
//! assert_eq!(store.query("4f2a", TimeRange::OneHour).len(), 720);
//! assert!(!store.query("4f2a", TimeRange::OneDay).is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`MetricsStore`] - Top-level handle; ingestion, maintenance, queries, persistence
//! - [`StoreConfig`] - The tier ladder and store knobs
//! - [`Collector`] - Sampling loop over a [`SampleSource`]
//! - [`Subscription`] - Live feed of newly pushed points
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`] - The store facade
//! - [`schema`] - Tier ladder and consolidation configuration
//! - [`point`] - The stored sample
//! - [`series`] - Per-container tier series and key resolution
//! - [`consolidate`] - Rollup and prune passes
//! - [`query`] - Time ranges and query results
//! - [`subscribe`] - Subscriber fan-out
//! - [`normalize`] - Raw counters to points
//! - [`collector`] - Sampling loop and reconciliation
//! - [`persist`] - Snapshot file format
//! - [`error`] - Error types

pub mod collector;
pub mod consolidate;
pub mod error;
pub mod normalize;
pub mod persist;
pub mod point;
pub mod query;
pub mod schema;
pub mod series;
pub mod store;
pub mod subscribe;

// Re-export primary API types at crate root for convenience.
pub use collector::{Collector, CollectorConfig, CycleReport, SampleSource};
pub use consolidate::ConsolidationReport;
pub use error::{MetricsError, Result};
pub use normalize::{Normalizer, NormalizerConfig, RawSample};
pub use point::MetricPoint;
pub use query::{QueryResult, TimeRange};
pub use schema::{AggregationPolicy, ConsolidationFn, StoreConfig, TierConfig};
pub use store::{ContainerStats, MetricsStore};
pub use subscribe::Subscription;
