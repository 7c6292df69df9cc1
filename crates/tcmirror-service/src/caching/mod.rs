//! # Caching infrastructure of the mirror
//!
//! Every record of a remote server is loaded at most as often as needed. The records live in a
//! partitioned [`KvStore`], one [`Table`] per kind of record and server, and are only fetched
//! from the remote server when they are absent, outdated, or expired.
//!
//! ## Loading Protocols
//!
//! - [`gateway::load_if_absent`]: immutable records, like the test occurrences of a finished
//!   build. A stored value is served forever.
//! - [`gateway::load_versioned`]: records implementing
//!   [`VersionedEntity`](tcmirror_sources::VersionedEntity). A stored value written by an
//!   older schema is reloaded, regardless of its age.
//! - [`gateway::load_or_merge`]: list-valued records that change over time, like the build
//!   history of a suite. They are wrapped into an [`Expirable`] and refreshed once their TTL
//!   runs out. The fresh list is merged into the stored one with [`merge_by_id`], so history
//!   that dropped out of the remote response window is never lost.
//! - [`InFlight`]: asynchronous loads, coalescing concurrent requests for the same key into a
//!   single remote call running on the bounded [`WorkerPool`].
//!
//! ## [`CacheEntry`] / [`CacheError`]
//!
//! All loads produce a [`CacheEntry`], which is a [`Result`] around a [`CacheError`].
//! A [`CacheError::NotFound`] is usually turned into an empty or stub value that IS stored, to
//! avoid asking the remote server for a record it permanently lacks on every read.
//! [`CacheError::Transport`] errors are never stored, and reach the caller who may retry.
//!
//! ### Metrics
//!
//! Each of these metrics is tagged with a `cache` field naming the table:
//!
//! - `caches.access`: All accesses.
//! - `caches.store.hit`: Accesses served by the store.
//! - `caches.store.miss`: Accesses that went to the remote server.
//! - `caches.store.outdated`: Stored values reloaded because of their schema version.
//! - `caches.store.expired`: Stored values reloaded because of their age.
//! - `caches.stub`: Placeholders created for missing or malformed records.
//! - `caches.inflight.join`: Requests joining an already running remote call.
//! - `caches.inflight.start`: Remote calls started by the deduplicator.

use std::sync::Arc;

use tcmirror_sources::{
    Build, BuildRef, Change, ChangesList, LogCheckResult, ProblemOccurrences, Statistics,
    TestOccurrenceFull, TestOccurrences,
};

use crate::migrations::AppliedMigration;
use crate::stats::RunStat;

mod cache_error;
mod config;
mod expirable;
pub mod gateway;
mod inflight;
mod merge;
mod store;


pub use cache_error::{CacheEntry, CacheEntryExt, CacheError};
pub use config::CacheName;
pub use expirable::Expirable;
pub use inflight::{InFlight, SharedFetch, WorkerPool};
pub use merge::{Identified, merge_by_id};
pub use store::{KvStore, MemoryStore, Table, TableName};

/// All tables of one remote server.
#[derive(Debug, Clone)]
pub struct Tables {
    pub build_refs: Table<BuildRef>,
    pub builds: Table<Build>,
    pub finished_builds: Table<Expirable<Vec<BuildRef>>>,
    pub finished_builds_include_failed: Table<Expirable<Vec<BuildRef>>>,
    pub build_queue: Table<Expirable<Vec<BuildRef>>>,
    pub running_builds: Table<Expirable<Vec<BuildRef>>>,
    pub test_occurrences: Table<TestOccurrences>,
    pub test_occurrence_full: Table<TestOccurrenceFull>,
    pub problems: Table<ProblemOccurrences>,
    pub build_statistics: Table<Statistics>,
    pub changes: Table<Change>,
    pub changes_lists: Table<ChangesList>,
    pub log_check_results: Table<LogCheckResult>,
    pub tests_run_stat: Table<RunStat>,
    pub suites_failure_run_stat: Table<RunStat>,
    pub done_migrations: Table<AppliedMigration>,
}

impl Tables {
    /// Opens all tables of the given server.
    pub fn open(store: Arc<dyn KvStore>, server_id: &str) -> Self {
        Self {
            build_refs: Table::open(store.clone(), server_id, CacheName::BuildRefs),
            builds: Table::open(store.clone(), server_id, CacheName::Builds),
            finished_builds: Table::open(store.clone(), server_id, CacheName::FinishedBuilds),
            finished_builds_include_failed: Table::open(
                store.clone(),
                server_id,
                CacheName::FinishedBuildsIncludeFailed,
            ),
            build_queue: Table::open(store.clone(), server_id, CacheName::BuildQueue),
            running_builds: Table::open(store.clone(), server_id, CacheName::RunningBuilds),
            test_occurrences: Table::open(store.clone(), server_id, CacheName::TestOccurrences),
            test_occurrence_full: Table::open(
                store.clone(),
                server_id,
                CacheName::TestOccurrenceFull,
            ),
            problems: Table::open(store.clone(), server_id, CacheName::Problems),
            build_statistics: Table::open(store.clone(), server_id, CacheName::BuildStatistics),
            changes: Table::open(store.clone(), server_id, CacheName::Changes),
            changes_lists: Table::open(store.clone(), server_id, CacheName::ChangesLists),
            log_check_results: Table::open(store.clone(), server_id, CacheName::LogCheckResults),
            tests_run_stat: Table::open(store.clone(), server_id, CacheName::TestsRunStat),
            suites_failure_run_stat: Table::open(
                store.clone(),
                server_id,
                CacheName::SuitesFailureRunStat,
            ),
            done_migrations: Table::open(store, server_id, CacheName::DoneMigrations),
        }
    }
}
