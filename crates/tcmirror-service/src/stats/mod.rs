//! Failure and duration statistics of tests and suites.
//!
//! Every test run and every finished build is folded into a [`RunStat`] keyed by test name or
//! suite id. Each fold is a single atomic update of one key in the store, so concurrent
//! recorders never lose runs and no cross-key locking is needed. The top-k queries scan the
//! whole table and may observe a mix of old and new states across keys.

use tcmirror_sources::{Build, TestOccurrence, TestOccurrences};

use crate::caching::Table;

mod run_stat;
mod top;

pub use run_stat::{RunSample, RunStat};
pub use top::top_by;

/// Default size of the latest window of a [`RunStat`].
pub const DEFAULT_LATEST_WINDOW: usize = 50;

/// Records runs into the per-test and per-suite statistics tables of one server.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    tests: Table<RunStat>,
    suites: Table<RunStat>,
    latest_window: usize,
}

impl StatsAggregator {
    pub fn new(tests: Table<RunStat>, suites: Table<RunStat>, latest_window: usize) -> Self {
        Self {
            tests,
            suites,
            latest_window,
        }
    }

    /// Folds a test run into the statistics of `test_name`.
    ///
    /// Returns whether the run was recorded. Muted and ignored runs are skipped, as are runs of
    /// a build already recorded for this test.
    pub fn record_test_run(&self, test_name: &str, occurrence: &TestOccurrence) -> bool {
        if test_name.is_empty() || occurrence.is_muted_or_ignored() {
            return false;
        }
        let window = self.latest_window;
        let recorded = self.tests.update(test_name, |current| {
            let mut stat = current.unwrap_or_else(|| RunStat::new(test_name));
            stat.add_test_run(occurrence, window).then_some(stat)
        });
        if recorded.is_none() {
            metric!(counter("stats.duplicate_runs") += 1, "kind" => "test");
            return false;
        }
        metric!(counter("stats.test_runs") += 1);
        true
    }

    /// Folds all runs of a build's test occurrences, returning how many were recorded.
    pub fn record_test_runs(&self, occurrences: &TestOccurrences) -> usize {
        occurrences
            .occurrences
            .iter()
            .filter(|occurrence| self.record_test_run(&occurrence.name, occurrence))
            .count()
    }

    /// Folds a finished build into the statistics of its suite.
    ///
    /// Returns whether the build was recorded. Stubs and builds already recorded are skipped.
    pub fn record_build_run(&self, suite_id: &str, build: &Build) -> bool {
        if suite_id.is_empty() || build.fake_stub {
            return false;
        }
        let window = self.latest_window;
        let recorded = self.suites.update(suite_id, |current| {
            let mut stat = current.unwrap_or_else(|| RunStat::new(suite_id));
            stat.add_build_run(build, window).then_some(stat)
        });
        if recorded.is_none() {
            metric!(counter("stats.duplicate_runs") += 1, "kind" => "build");
            return false;
        }
        metric!(counter("stats.build_runs") += 1);
        true
    }

    pub fn lookup_test(&self, test_name: &str) -> Option<RunStat> {
        self.tests.get(test_name)
    }

    pub fn lookup_suite(&self, suite_id: &str) -> Option<RunStat> {
        self.suites.get(suite_id)
    }

    /// The `n` tests failing most often.
    pub fn top_by_failure_rate(&self, n: usize) -> Vec<RunStat> {
        top_by(self.tests.values(), n, RunStat::failure_rate)
    }

    /// The `n` slowest tests.
    pub fn top_by_average_duration(&self, n: usize) -> Vec<RunStat> {
        top_by(self.tests.values(), n, RunStat::average_duration_ms)
    }

    /// The `n` suites failing most often.
    pub fn top_failing_suites(&self, n: usize) -> Vec<RunStat> {
        top_by(self.suites.values(), n, RunStat::failure_rate)
    }

    /// Drops all test statistics, returning how many there were.
    pub fn clear_tests(&self) -> usize {
        self.tests.clear()
    }

    /// Drops all suite statistics, returning how many there were.
    pub fn clear_suites(&self) -> usize {
        self.suites.clear()
    }
}
