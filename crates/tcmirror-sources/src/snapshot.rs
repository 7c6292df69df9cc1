//! A [`RemoteSource`] serving a recorded snapshot of a CI server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    BUILD_VERSION, Build, BuildRef, BuildState, Change, ChangesList, LOG_CHECK_RESULT_VERSION,
    LogCheckResult, ProblemOccurrences, RemoteError, RemoteResult, RemoteSource, Statistics, Status,
    TestOccurrenceFull, TestOccurrences,
};

/// Recorded state of a remote server.
///
/// Entities other than builds are keyed by the href they are requested with.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// All builds, in any state.
    pub builds: Vec<Build>,
    /// Test occurrences by href.
    pub test_occurrences: BTreeMap<String, TestOccurrences>,
    /// Full test occurrences by href.
    pub test_occurrences_full: BTreeMap<String, TestOccurrenceFull>,
    /// Problems by href.
    pub problems: BTreeMap<String, ProblemOccurrences>,
    /// Changes by href.
    pub changes: BTreeMap<String, Change>,
    /// Change lists by href.
    pub changes_lists: BTreeMap<String, ChangesList>,
    /// Build statistics by href.
    pub statistics: BTreeMap<String, Statistics>,
    /// Raw build logs by build id.
    pub logs: BTreeMap<u64, String>,
}

impl RemoteSnapshot {
    /// Mutable access to the build with the given id.
    pub fn build_mut(&mut self, id: u64) -> Option<&mut Build> {
        self.builds.iter_mut().find(|b| b.id() == id)
    }

    fn list(&self, filter: impl Fn(&BuildRef) -> bool) -> Vec<BuildRef> {
        let mut refs: Vec<_> = self
            .builds
            .iter()
            .map(|b| &b.build_ref)
            .filter(|r| filter(r))
            .cloned()
            .collect();
        refs.sort_by_key(|r| r.id);
        refs
    }

    fn finished(&self, suite_id: &str, branch: &str, include_failed: bool) -> Vec<BuildRef> {
        self.list(|r| {
            r.build_type_id == suite_id
                && r.branch_name == branch
                && r.state == BuildState::Finished
                && (include_failed || r.status != Status::Unknown)
        })
    }

    fn in_state(&self, state: BuildState, branch: Option<&str>) -> Vec<BuildRef> {
        self.list(|r| r.state == state && branch.is_none_or(|b| r.branch_name == b))
    }

    fn build(&self, href: &str) -> RemoteResult<Build> {
        let mut build = self
            .builds
            .iter()
            .find(|b| b.build_ref.href() == href)
            .cloned()
            .ok_or(RemoteError::NotFound)?;
        build.version = BUILD_VERSION;
        Ok(build)
    }

    fn enqueue(&mut self, suite_id: &str, branch: &str, queue_at_top: bool) -> BuildRef {
        let id = self.builds.iter().map(Build::id).max().map_or(1, |id| id + 1);
        let build_ref = BuildRef {
            id,
            build_type_id: suite_id.to_owned(),
            branch_name: branch.to_owned(),
            state: BuildState::Queued,
            status: Status::Unknown,
            href: None,
        };
        let build = Build {
            build_ref: build_ref.clone(),
            version: BUILD_VERSION,
            ..Default::default()
        };
        if queue_at_top {
            self.builds.insert(0, build);
        } else {
            self.builds.push(build);
        }
        build_ref
    }

    fn check_log(&self, build_id: u64) -> RemoteResult<LogCheckResult> {
        let log = self.logs.get(&build_id).ok_or(RemoteError::NotFound)?;

        let mut result = LogCheckResult {
            version: LOG_CHECK_RESULT_VERSION,
            ..Default::default()
        };
        let mut dump: Option<Vec<&str>> = None;
        for line in log.lines() {
            if line.starts_with("Full thread dump") {
                dump = Some(vec![line]);
            } else if let Some(lines) = dump.as_mut() {
                if line.trim().is_empty() && lines.len() > 1 {
                    result.last_thread_dump = dump.take().map(|lines| lines.join("\n"));
                } else {
                    lines.push(line);
                }
            }
            if line.contains("[WARN") || line.contains("WARNING") {
                result.warns.push(line.to_owned());
            }
        }
        if let Some(lines) = dump {
            result.last_thread_dump = Some(lines.join("\n"));
        }
        Ok(result)
    }
}

fn lookup<T: Clone>(entries: &BTreeMap<String, T>, href: &str) -> RemoteResult<T> {
    entries.get(href).cloned().ok_or(RemoteError::NotFound)
}

#[derive(Debug)]
enum Backing {
    Memory(RwLock<RemoteSnapshot>),
    File(PathBuf),
}

/// A remote server backed by a [`RemoteSnapshot`].
///
/// The snapshot either lives in memory, where it can be modified to simulate progress on the
/// server, or in a JSON file which is read again on every call.
#[derive(Debug)]
pub struct SnapshotRemote {
    host: String,
    backing: Backing,
}

impl SnapshotRemote {
    /// Serves the given in-memory snapshot.
    pub fn new(host: impl Into<String>, snapshot: RemoteSnapshot) -> Self {
        Self {
            host: host.into(),
            backing: Backing::Memory(RwLock::new(snapshot)),
        }
    }

    /// Serves the JSON snapshot stored at `path`.
    pub fn from_path(host: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            host: host.into(),
            backing: Backing::File(path.as_ref().to_owned()),
        }
    }

    /// Modifies an in-memory snapshot.
    ///
    /// Returns `None` for file-backed snapshots, which are never written.
    pub fn update<R>(&self, f: impl FnOnce(&mut RemoteSnapshot) -> R) -> Option<R> {
        match &self.backing {
            Backing::Memory(snapshot) => Some(f(&mut snapshot.write().unwrap())),
            Backing::File(_) => None,
        }
    }

    async fn read<T>(&self, f: impl FnOnce(&RemoteSnapshot) -> RemoteResult<T>) -> RemoteResult<T> {
        match &self.backing {
            Backing::Memory(snapshot) => {
                let snapshot = snapshot.read().unwrap();
                f(&snapshot)
            }
            Backing::File(path) => {
                let snapshot = load_snapshot(path).await?;
                f(&snapshot)
            }
        }
    }
}

async fn load_snapshot(path: &Path) -> RemoteResult<RemoteSnapshot> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| RemoteError::Transport(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&data)
        .map_err(|e| RemoteError::Transport(format!("failed to parse {}: {e}", path.display())))
}

impl RemoteSource for SnapshotRemote {
    fn host(&self) -> &str {
        &self.host
    }

    fn list_finished_builds<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.read(move |s| Ok(s.finished(suite_id, branch, false))))
    }

    fn list_finished_builds_include_failed<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.read(move |s| Ok(s.finished(suite_id, branch, true))))
    }

    fn list_queued_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.read(move |s| Ok(s.in_state(BuildState::Queued, branch))))
    }

    fn list_running_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>> {
        Box::pin(self.read(move |s| Ok(s.in_state(BuildState::Running, branch))))
    }

    fn get_build<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Build>> {
        Box::pin(self.read(move |s| s.build(href)))
    }

    fn get_test_occurrences<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, RemoteResult<TestOccurrences>> {
        Box::pin(self.read(move |s| lookup(&s.test_occurrences, href)))
    }

    fn get_test_occurrence_full<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, RemoteResult<TestOccurrenceFull>> {
        Box::pin(self.read(move |s| lookup(&s.test_occurrences_full, href)))
    }

    fn get_problems<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ProblemOccurrences>> {
        Box::pin(self.read(move |s| lookup(&s.problems, href)))
    }

    fn get_change<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Change>> {
        Box::pin(self.read(move |s| lookup(&s.changes, href)))
    }

    fn get_changes_list<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ChangesList>> {
        Box::pin(self.read(move |s| lookup(&s.changes_lists, href)))
    }

    fn get_build_statistics<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Statistics>> {
        Box::pin(self.read(move |s| lookup(&s.statistics, href)))
    }

    fn trigger_build<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
        queue_at_top: bool,
    ) -> BoxFuture<'a, RemoteResult<BuildRef>> {
        let queued = self.update(|s| s.enqueue(suite_id, branch, queue_at_top));
        Box::pin(async move {
            queued.ok_or_else(|| RemoteError::Transport("file snapshots are read-only".into()))
        })
    }

    fn download_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<Vec<u8>>> {
        Box::pin(self.read(move |s| {
            let log = s.logs.get(&build_id).ok_or(RemoteError::NotFound)?;
            Ok(log.as_bytes().to_vec())
        }))
    }

    fn analyze_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<LogCheckResult>> {
        Box::pin(self.read(move |s| s.check_log(build_id)))
    }
}
