use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tcmirror_sources::ChainAtServer;
use tracing::level_filters::LevelFilter;

use crate::stats::DEFAULT_LATEST_WINDOW;

/// The branch names resolve to when a request names no branch or `<default>`.
pub const DEFAULT_BRANCH: &str = "refs/heads/master";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "tcmirror".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// A suite and branch whose history is kept complete by reindexing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct TrackedChain {
    /// The suite (build type) id.
    pub suite_id: String,
    /// The branch, defaults to [`Config::default_branch`].
    #[serde(default)]
    pub branch: Option<String>,
}

/// A remote CI server to mirror.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The unique id of the server, which prefixes all of its tables.
    pub id: String,
    /// Path to a JSON snapshot serving as the remote data.
    pub snapshot: Option<PathBuf>,
    /// Chains reindexed on startup and on demand.
    pub tracked: Vec<TrackedChain>,
}

impl ServerConfig {
    /// The tracked chains of this server, with branches resolved against `default_branch`.
    pub fn chains<'a>(
        &'a self,
        default_branch: &'a str,
    ) -> impl Iterator<Item = (ChainAtServer, &'a str)> + 'a {
        self.tracked.iter().map(move |chain| {
            let branch = chain.branch.as_deref().unwrap_or(default_branch);
            (ChainAtServer::new(&self.id, &chain.suite_id), branch)
        })
    }
}

/// Time-to-live of the expiring caches.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// How long a fetched build history is served before it is refreshed.
    #[serde(with = "humantime_serde")]
    pub finished_builds_ttl: Duration,

    /// How long the build queue is served before it is refreshed.
    ///
    /// Shortened right after a build was triggered.
    #[serde(with = "humantime_serde")]
    pub queued_builds_ttl: Duration,

    /// How long the list of running builds is served before it is refreshed.
    ///
    /// Shortened right after a build was triggered.
    #[serde(with = "humantime_serde")]
    pub running_builds_ttl: Duration,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            finished_builds_ttl: Duration::from_secs(60),
            queued_builds_ttl: Duration::from_secs(60),
            running_builds_ttl: Duration::from_secs(60),
        }
    }
}

/// Run statistics.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    /// Whether loaded builds and tests update the run statistics.
    pub enabled: bool,
    /// Number of most recent runs kept per test and suite.
    pub latest_window: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latest_window: DEFAULT_LATEST_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WorkersConfig {
    /// The maximum number of remote calls running concurrently.
    pub max_concurrent_fetches: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ActualizerConfig {
    /// The pause between two actualization runs of the `run` command.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Whether tracked chains are reindexed before the first actualization run.
    pub reindex_on_start: bool,
}

impl Default for ActualizerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            reindex_on_start: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The mirrored servers.
    pub servers: Vec<ServerConfig>,

    /// The branch to use when none or `<default>` is requested.
    pub default_branch: String,

    /// Configuration of the expiring caches.
    pub caches: CacheConfigs,

    /// Configuration of the run statistics.
    pub stats: StatsConfig,

    /// Configuration of the remote call workers.
    pub workers: WorkersConfig,

    /// Configuration of the periodic actualization.
    pub actualizer: ActualizerConfig,

    /// Configures the logging system.
    pub logging: Logging,

    /// Configures the metrics system.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    /// Looks up a configured server by id.
    pub fn server(&self, server_id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|server| server.id == server_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: Vec::new(),
            default_branch: DEFAULT_BRANCH.to_owned(),
            caches: CacheConfigs::default(),
            stats: StatsConfig::default(),
            workers: WorkersConfig::default(),
            actualizer: ActualizerConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
