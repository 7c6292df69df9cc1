//! A local, versioned mirror of the build history of remote CI servers.
//!
//! The [`Mirror`] of a server serves builds, tests and related records out of a partitioned
//! [`KvStore`](caching::KvStore), loading them from the [`RemoteSource`](tcmirror_sources::RemoteSource)
//! on demand. Concurrent loads of the same record are coalesced, build and test runs feed the
//! [`StatsAggregator`], and the [`Actualizer`] advances queued and running builds until they
//! are finished.

#[macro_use]
pub mod metrics;

pub mod actualizer;
pub mod caching;
pub mod config;
pub mod logging;
pub mod migrations;
pub mod mirror;
pub mod registry;
pub mod stats;
pub mod trigger;
pub mod utils;

pub use actualizer::{ActualizationReport, Actualizer};
pub use mirror::Mirror;
pub use registry::MirrorRegistry;
pub use stats::StatsAggregator;
