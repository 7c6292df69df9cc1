use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LOG_CHECK_RESULT_VERSION, VersionedEntity};

/// A VCS change (commit) known to the remote server.
///
/// The default value stands in for changes that can not be loaded.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Change id on the remote server.
    #[serde(default)]
    pub id: Option<String>,
    /// VCS revision.
    #[serde(default)]
    pub version: Option<String>,
    /// Author as known to the VCS.
    #[serde(default)]
    pub username: Option<String>,
    /// Commit date.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Link to the change in the web UI.
    #[serde(default)]
    pub web_url: Option<String>,
}

impl Change {
    /// Whether this is an empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.version.is_none()
    }
}

/// Reference to a [`Change`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRef {
    /// Change id.
    pub id: String,
    /// Link to the full change.
    #[serde(default)]
    pub href: Option<String>,
}

/// The changes included into a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesList {
    /// The changes.
    #[serde(default, rename = "change")]
    pub changes: Vec<ChangeRef>,
}

/// A single named value of [`Statistics`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsProperty {
    /// Property name, like `BuildDuration`.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// Statistic values reported for a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// The values.
    #[serde(default, rename = "property")]
    pub properties: Vec<StatisticsProperty>,
}

impl Statistics {
    /// Looks up a value by name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// The build duration in milliseconds.
    pub fn build_duration_ms(&self) -> Option<u64> {
        self.value("BuildDuration")?.parse().ok()
    }
}

/// What a check of a build log found.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCheckResult {
    /// Warnings found in the log.
    #[serde(default)]
    pub warns: Vec<String>,
    /// The last thread dump printed to the log.
    #[serde(default)]
    pub last_thread_dump: Option<String>,
    /// Schema version, see [`LOG_CHECK_RESULT_VERSION`].
    #[serde(default)]
    pub version: u32,
}

impl VersionedEntity for LogCheckResult {
    const LATEST_VERSION: u32 = LOG_CHECK_RESULT_VERSION;

    fn version(&self) -> u32 {
        self.version
    }
}
