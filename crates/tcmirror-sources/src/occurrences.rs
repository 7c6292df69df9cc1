use serde::{Deserialize, Serialize};

use crate::Status;

/// A single run of a test within a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOccurrence {
    /// Occurrence locator, like `build:(id:123),id:456`.
    pub id: String,
    /// Full test name.
    pub name: String,
    /// Outcome of the run.
    #[serde(default)]
    pub status: Status,
    /// Run time in milliseconds.
    #[serde(default, rename = "duration")]
    pub duration_ms: Option<u64>,
    /// Muted tests do not affect the build status.
    #[serde(default)]
    pub muted: bool,
    /// Ignored tests were not executed.
    #[serde(default)]
    pub ignored: bool,
    /// Link to the full occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl TestOccurrence {
    /// Whether this run failed.
    pub fn is_failed(&self) -> bool {
        self.status == Status::Failure
    }

    /// Whether this run should be left out of statistics.
    pub fn is_muted_or_ignored(&self) -> bool {
        self.muted || self.ignored
    }

    /// The id of the build this occurrence belongs to, parsed from the occurrence locator.
    pub fn build_id(&self) -> Option<u64> {
        let (_, rest) = self.id.split_once("build:(id:")?;
        let end = rest.find(')')?;
        rest[..end].parse().ok()
    }
}

/// A page of test occurrences of a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOccurrences {
    /// The occurrences.
    #[serde(default, rename = "testOccurrence")]
    pub occurrences: Vec<TestOccurrence>,
}

/// A test occurrence with its details.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOccurrenceFull {
    /// The summary of the occurrence.
    #[serde(flatten)]
    pub occurrence: TestOccurrence,
    /// Stack trace or failure message.
    #[serde(default)]
    pub details: Option<String>,
    /// Id of the test, shared by all occurrences of it.
    #[serde(default)]
    pub test_id: Option<String>,
}

/// A build problem, like a non-zero exit code or a timeout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemOccurrence {
    /// Occurrence locator.
    pub id: String,
    /// Problem identity, stable across builds.
    #[serde(default)]
    pub identity: Option<String>,
    /// Problem kind, like `TC_EXIT_CODE` or `TC_EXECUTION_TIMEOUT`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Link to the occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// All problems of a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemOccurrences {
    /// The problems.
    #[serde(default, rename = "problemOccurrence")]
    pub problems: Vec<ProblemOccurrence>,
}
