//! One-off passes over the stored data of a server.
//!
//! Passes run before a mirror serves any request. Each applied pass leaves a marker in the
//! `doneMigrations` table and is skipped from then on. Passes rebuild their target from scratch,
//! so a pass interrupted before writing its marker can safely run again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::caching::Tables;
use crate::stats::StatsAggregator;

/// Marker of an applied pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
    /// Number of records the pass processed.
    pub processed: usize,
}

type Pass = fn(&Tables, &StatsAggregator) -> usize;

/// All passes, in the order they are applied.
const PASSES: &[(&str, Pass)] = &[
    ("recompute-test-run-stats", recompute_test_run_stats),
    ("recompute-suite-failure-stats", recompute_suite_failure_stats),
];

/// Names of all known passes.
pub fn pass_names() -> impl Iterator<Item = &'static str> {
    PASSES.iter().map(|(name, _)| *name)
}

/// Applies all passes that were not applied before, returning the names of applied passes.
pub fn run(tables: &Tables, stats: &StatsAggregator) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for (name, pass) in PASSES {
        if tables.done_migrations.get(name).is_some() {
            tracing::debug!(migration = name, "Migration already applied");
            continue;
        }
        apply(tables, stats, name, *pass);
        applied.push(*name);
    }
    applied
}

/// Applies the named pass, even if it was applied before.
///
/// Returns `None` for unknown passes.
pub fn apply_pass(tables: &Tables, stats: &StatsAggregator, name: &str) -> Option<usize> {
    let (name, pass) = PASSES.iter().find(|(pass_name, _)| *pass_name == name)?;
    Some(apply(tables, stats, name, *pass))
}

fn apply(tables: &Tables, stats: &StatsAggregator, name: &str, pass: Pass) -> usize {
    tracing::info!(migration = name, "Applying migration");
    let processed = pass(tables, stats);
    tables.done_migrations.put(
        name,
        &AppliedMigration {
            name: name.to_owned(),
            applied_at: Utc::now(),
            processed,
        },
    );
    metric!(counter("migrations.applied") += 1, "migration" => name);
    tracing::info!(migration = name, processed, "Applied migration");
    processed
}

/// Rebuilds the run statistics of all tests from the stored test occurrences.
fn recompute_test_run_stats(tables: &Tables, stats: &StatsAggregator) -> usize {
    let cleared = stats.clear_tests();
    tracing::debug!(cleared, "Cleared test run statistics");

    // oldest builds first, so the latest window ends up with the most recent runs
    let mut occurrences: Vec<_> = tables
        .test_occurrences
        .values()
        .flat_map(|occurrences| occurrences.occurrences)
        .collect();
    occurrences.sort_by_key(|occurrence| occurrence.build_id());

    occurrences
        .iter()
        .filter(|occurrence| stats.record_test_run(&occurrence.name, occurrence))
        .count()
}

/// Rebuilds the failure statistics of all suites from the stored builds.
fn recompute_suite_failure_stats(tables: &Tables, stats: &StatsAggregator) -> usize {
    let cleared = stats.clear_suites();
    tracing::debug!(cleared, "Cleared suite failure statistics");

    let mut builds: Vec<_> = tables
        .builds
        .values()
        .filter(|build| !build.fake_stub && build.has_finish_date())
        .collect();
    builds.sort_by_key(|build| build.id());

    builds
        .iter()
        .filter(|build| stats.record_build_run(build.suite_id(), build))
        .count()
}
