//! Helpers for testing the mirror.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use [`CountingRemote`] as the remote server. It serves an in-memory snapshot that can be
//!    changed while the test runs, counts the calls per operation, and can be told to be slow or
//!    to fail.
//!
//!  - When using [`tempdir`], hold the handle for the entire lifetime of the test, for example
//!    `let _dir = tcmirror_test::tempdir()`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{Duration as TimeDelta, TimeZone, Utc};
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use tcmirror_sources::{
    BUILD_VERSION, Build, BuildRef, BuildState, Change, ChangesList, LogCheckResult,
    ProblemOccurrences, RemoteError, RemoteResult, RemoteSnapshot, RemoteSource, SnapshotRemote,
    Statistics, Status, TestOccurrence, TestOccurrenceFull, TestOccurrences, build_href,
};

pub use tempfile::TempDir;

/// The default branch of synthetic builds.
pub const MASTER: &str = "refs/heads/master";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `tcmirror` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "tcmirror_service=trace,tcmirror_sources=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Writes `snapshot` as JSON into `dir`, returning the path of the file.
pub fn write_snapshot(dir: &TempDir, name: &str, snapshot: &RemoteSnapshot) -> PathBuf {
    let path = dir.path().join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(snapshot).unwrap()).unwrap();
    path
}

/// The test occurrences href of a build.
pub fn tests_href(build_id: u64) -> String {
    format!("/app/rest/latest/testOccurrences?locator=build:(id:{build_id})")
}

/// The statistics href of a build.
pub fn statistics_href(build_id: u64) -> String {
    format!("/app/rest/latest/builds/id:{build_id}/statistics")
}

/// A build of `suite_id` in the default branch.
///
/// Finished builds ran for `id` seconds, starting at a fixed point in time.
pub fn build(id: u64, suite_id: &str, state: BuildState, status: Status) -> Build {
    let start = Utc.with_ymd_and_hms(2018, 10, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(id as i64);
    let finished = state == BuildState::Finished;
    Build {
        build_ref: BuildRef {
            id,
            build_type_id: suite_id.to_owned(),
            branch_name: MASTER.to_owned(),
            state,
            status,
            href: Some(build_href(id)),
        },
        start_date: (state != BuildState::Queued).then_some(start),
        finish_date: finished.then(|| start + TimeDelta::seconds(id as i64)),
        test_occurrences_href: Some(tests_href(id)),
        statistics_href: Some(statistics_href(id)),
        version: BUILD_VERSION,
        ..Default::default()
    }
}

/// Synthetic history of `count` builds of a suite, with ids starting at `first_id`.
///
/// The first `finished` builds are finished successfully, the rest alternate between queued and
/// running.
pub fn synthetic_history(suite_id: &str, first_id: u64, count: usize, finished: usize) -> Vec<Build> {
    (0..count)
        .map(|i| {
            let id = first_id + i as u64;
            if i < finished {
                build(id, suite_id, BuildState::Finished, Status::Success)
            } else if i % 2 == 0 {
                build(id, suite_id, BuildState::Queued, Status::Unknown)
            } else {
                build(id, suite_id, BuildState::Running, Status::Unknown)
            }
        })
        .collect()
}

/// Marks all builds of the snapshot as finished successfully.
pub fn finish_all(snapshot: &mut RemoteSnapshot) {
    for stored in &mut snapshot.builds {
        if stored.build_ref.state != BuildState::Finished {
            let suite_id = stored.build_ref.build_type_id.clone();
            *stored = build(stored.id(), &suite_id, BuildState::Finished, Status::Success);
        }
    }
}

/// Test occurrences of a build, one per `(name, status)`.
pub fn test_occurrences(build_id: u64, tests: &[(&str, Status)]) -> TestOccurrences {
    TestOccurrences {
        occurrences: tests
            .iter()
            .enumerate()
            .map(|(i, (name, status))| TestOccurrence {
                id: format!("build:(id:{build_id}),id:{i}"),
                name: (*name).to_owned(),
                status: *status,
                duration_ms: Some(100 * (i as u64 + 1)),
                ..Default::default()
            })
            .collect(),
    }
}

/// A [`RemoteSource`] over an in-memory snapshot, counting its calls.
#[derive(Debug)]
pub struct CountingRemote {
    inner: SnapshotRemote,
    hits: Mutex<BTreeMap<&'static str, usize>>,
    latency: Mutex<Option<Duration>>,
    failures: Mutex<BTreeMap<&'static str, RemoteError>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl CountingRemote {
    pub fn new(snapshot: RemoteSnapshot) -> Self {
        Self {
            inner: SnapshotRemote::new("https://ci.ignite.apache.org", snapshot),
            hits: Default::default(),
            latency: Default::default(),
            failures: Default::default(),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Makes every call wait for `latency` before answering.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Changes the served snapshot.
    pub fn update<R>(&self, f: impl FnOnce(&mut RemoteSnapshot) -> R) -> R {
        self.inner.update(f).unwrap()
    }

    /// Makes all further calls of `op` fail with `error`.
    pub fn fail(&self, op: &'static str, error: RemoteError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// The number of calls of `op` so far.
    pub fn hits(&self, op: &str) -> usize {
        self.hits.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Returns the total number of calls and resets all counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the calls per operation and resets all counters.
    pub fn all_hits(&self) -> Vec<(&'static str, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    /// The highest number of calls that were running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn call<T: Send>(
        &self,
        op: &'static str,
        response: BoxFuture<'_, RemoteResult<T>>,
    ) -> RemoteResult<T> {
        *self.hits.lock().unwrap().entry(op).or_default() += 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failures.lock().unwrap().get(op).cloned();
        let result = match failure {
            Some(error) => Err(error),
            None => response.await,
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl RemoteSource for CountingRemote {
    fn host(&self) -> &str {
        self.inner.host()
    }

    fn list_finished_builds<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.call(
            "list_finished_builds",
            self.inner.list_finished_builds(suite_id, branch),
        ))
    }

    fn list_finished_builds_include_failed<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.call(
            "list_finished_builds_include_failed",
            self.inner.list_finished_builds_include_failed(suite_id, branch),
        ))
    }

    fn list_queued_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.call("list_queued_builds", self.inner.list_queued_builds(branch)))
    }

    fn list_running_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.call("list_running_builds", self.inner.list_running_builds(branch)))
    }

    fn get_build<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Build>> {
        Box::pin(self.call("get_build", self.inner.get_build(href)))
    }

    fn get_test_occurrences<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, RemoteResult<TestOccurrences>> {
        Box::pin(self.call("get_test_occurrences", self.inner.get_test_occurrences(href)))
    }

    fn get_test_occurrence_full<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, RemoteResult<TestOccurrenceFull>> {
        Box::pin(self.call(
            "get_test_occurrence_full",
            self.inner.get_test_occurrence_full(href),
        ))
    }

    fn get_problems<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ProblemOccurrences>> {
        Box::pin(self.call("get_problems", self.inner.get_problems(href)))
    }

    fn get_change<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Change>> {
        Box::pin(self.call("get_change", self.inner.get_change(href)))
    }

    fn get_changes_list<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ChangesList>> {
        Box::pin(self.call("get_changes_list", self.inner.get_changes_list(href)))
    }

    fn get_build_statistics<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Statistics>> {
        Box::pin(self.call("get_build_statistics", self.inner.get_build_statistics(href)))
    }

    fn trigger_build<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
        queue_at_top: bool,
    ) -> BoxFuture<'a, RemoteResult<BuildRef>> {
        Box::pin(self.call(
            "trigger_build",
            self.inner.trigger_build(suite_id, branch, queue_at_top),
        ))
    }

    fn download_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<Vec<u8>>> {
        Box::pin(self.call("download_build_log", self.inner.download_build_log(build_id)))
    }

    fn analyze_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<LogCheckResult>> {
        Box::pin(self.call("analyze_build_log", self.inner.analyze_build_log(build_id)))
    }
}
