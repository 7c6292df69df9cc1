use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BUILD_VERSION, VersionedEntity};

/// Lifecycle state of a build on the remote server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    /// Waiting in the build queue.
    #[default]
    Queued,
    /// Currently executed by an agent.
    Running,
    /// Done. A finished build never changes again.
    Finished,
}

impl BuildState {
    /// Whether this is the final state of a build.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Whether a build in this state may move on to `next`.
    ///
    /// States only ever advance: `queued -> running -> finished` and `queued -> finished`.
    pub fn can_advance_to(self, next: BuildState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running) | (Self::Queued, Self::Finished) | (Self::Running, Self::Finished)
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a build or a test run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Passed.
    Success,
    /// Failed.
    Failure,
    /// Not known yet, or not reported by the server.
    #[default]
    Unknown,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical href of the build with the given id.
pub fn build_href(id: u64) -> String {
    format!("/app/rest/latest/builds/id:{id}")
}

/// Lightweight reference to a build.
///
/// The id is unique per remote server and grows with the creation time of builds.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRef {
    /// Build id.
    pub id: u64,
    /// The suite (build configuration) this build belongs to.
    pub build_type_id: String,
    /// The branch this build was executed for.
    #[serde(default)]
    pub branch_name: String,
    /// Lifecycle state.
    #[serde(default)]
    pub state: BuildState,
    /// Outcome, only meaningful once finished.
    #[serde(default)]
    pub status: Status,
    /// Link to the full build, if the server provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl BuildRef {
    /// The href of the full build.
    pub fn href(&self) -> String {
        self.href.clone().unwrap_or_else(|| build_href(self.id))
    }

    /// Whether this build reached its final state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether this build finished successfully.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Full details of a build.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// The reference part of this build.
    #[serde(flatten)]
    pub build_ref: BuildRef,
    /// When an agent started the build.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// When the build finished.
    #[serde(default)]
    pub finish_date: Option<DateTime<Utc>>,
    /// Link to the test occurrences of this build.
    #[serde(default)]
    pub test_occurrences_href: Option<String>,
    /// Link to the problem occurrences of this build.
    #[serde(default)]
    pub problem_occurrences_href: Option<String>,
    /// Link to the changes of this build.
    #[serde(default)]
    pub changes_href: Option<String>,
    /// Link to the statistics of this build.
    #[serde(default)]
    pub statistics_href: Option<String>,
    /// Set on placeholders stored for builds the remote server does not know.
    #[serde(default)]
    pub fake_stub: bool,
    /// Schema version, see [`BUILD_VERSION`].
    #[serde(default)]
    pub version: u32,
}

impl Build {
    /// Creates a placeholder for a build that does not exist on the remote server.
    pub fn fake_stub() -> Self {
        Self {
            fake_stub: true,
            version: BUILD_VERSION,
            ..Default::default()
        }
    }

    /// The build id.
    pub fn id(&self) -> u64 {
        self.build_ref.id
    }

    /// The suite this build belongs to.
    pub fn suite_id(&self) -> &str {
        &self.build_ref.build_type_id
    }

    /// Whether the build has finished according to its finish date.
    pub fn has_finish_date(&self) -> bool {
        self.finish_date.is_some()
    }

    /// Wall-clock duration of the build, if it was started and has finished.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_date?;
        let finish = self.finish_date?;
        (finish - start).to_std().ok()
    }
}

impl VersionedEntity for Build {
    const LATEST_VERSION: u32 = BUILD_VERSION;

    fn version(&self) -> u32 {
        self.version
    }

    fn is_fake_stub(&self) -> bool {
        self.fake_stub
    }
}
