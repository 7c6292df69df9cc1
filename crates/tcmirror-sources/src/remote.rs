use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Build, BuildRef, Change, ChangesList, LogCheckResult, ProblemOccurrences, Statistics,
    TestOccurrenceFull, TestOccurrences,
};

/// Classification of failed remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote server does not know the requested record.
    #[error("not found")]
    NotFound,
    /// The server could not be reached, answered with a server error, or sent unparseable data.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response was parseable but semantically invalid.
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Result of a remote call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A suite (build configuration) tracked on a given remote server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainAtServer {
    /// Id of the remote server.
    pub server_id: String,
    /// Id of the suite.
    pub suite_id: String,
}

impl ChainAtServer {
    /// Creates a chain of `suite_id` on `server_id`.
    pub fn new(server_id: impl Into<String>, suite_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            suite_id: suite_id.into(),
        }
    }
}

impl fmt::Display for ChainAtServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.suite_id, self.server_id)
    }
}

/// Access to the data of a remote CI server.
///
/// Implementations are expected to be cheap to share between tasks, all calls may run
/// concurrently. Records are addressed by their `href` as handed out by the server itself.
pub trait RemoteSource: Send + Sync + fmt::Debug + 'static {
    /// Host name or URL of the server, for diagnostics.
    fn host(&self) -> &str;

    /// Finished builds of a suite in a branch, excluding builds that failed to start.
    fn list_finished_builds<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>>;

    /// All finished builds of a suite in a branch.
    fn list_finished_builds_include_failed<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>>;

    /// Builds waiting in the queue, optionally restricted to a branch.
    fn list_queued_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>>;

    /// Builds currently running, optionally restricted to a branch.
    fn list_running_builds<'a>(
        &'a self,
        branch: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<Vec<BuildRef>>>;

    /// Full details of a build.
    fn get_build<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Build>>;

    /// Test occurrences of a build.
    fn get_test_occurrences<'a>(&'a self, href: &'a str)
    -> BoxFuture<'a, RemoteResult<TestOccurrences>>;

    /// A single test occurrence with details.
    fn get_test_occurrence_full<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, RemoteResult<TestOccurrenceFull>>;

    /// Problems of a build.
    fn get_problems<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ProblemOccurrences>>;

    /// A single change.
    fn get_change<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Change>>;

    /// Changes included into a build.
    fn get_changes_list<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<ChangesList>>;

    /// Statistic values of a build.
    fn get_build_statistics<'a>(&'a self, href: &'a str) -> BoxFuture<'a, RemoteResult<Statistics>>;

    /// Puts a new build of a suite into the queue.
    fn trigger_build<'a>(
        &'a self,
        suite_id: &'a str,
        branch: &'a str,
        queue_at_top: bool,
    ) -> BoxFuture<'a, RemoteResult<BuildRef>>;

    /// The raw log of a build.
    fn download_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<Vec<u8>>>;

    /// Checks the log of a build for warnings and thread dumps.
    fn analyze_build_log(&self, build_id: u64) -> BoxFuture<'_, RemoteResult<LogCheckResult>>;
}
