use std::fmt;

/// Partition count of tables created before the storage layout was revised.
const LEGACY_PARTITIONS: usize = 1024;

/// Partition count of all newer tables.
const PARTITIONS: usize = 32;

/// All known cache names.
///
/// Every server gets its own set of tables, named `<server id>.<cache name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheName {
    BuildStatistics,
    TestOccurrenceFull,
    FinishedBuilds,
    FinishedBuildsIncludeFailed,
    Problems,
    TestOccurrences,
    TestsRunStat,
    LogCheckResults,
    Changes,
    ChangesLists,
    SuitesFailureRunStat,
    Builds,
    BuildRefs,
    BuildQueue,
    RunningBuilds,
    DoneMigrations,
}

impl CacheName {
    /// Whether the table uses the legacy storage layout.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::BuildStatistics
                | Self::TestOccurrenceFull
                | Self::FinishedBuilds
                | Self::FinishedBuildsIncludeFailed
                | Self::Problems
        )
    }

    /// The number of partitions of the table.
    pub fn partitions(&self) -> usize {
        if self.is_legacy() {
            LEGACY_PARTITIONS
        } else {
            PARTITIONS
        }
    }
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::BuildStatistics => "stat",
            Self::TestOccurrenceFull => "testOccurrenceFull",
            Self::FinishedBuilds => "finishedBuilds",
            Self::FinishedBuildsIncludeFailed => "finishedBuildsIncludeFailed",
            Self::Problems => "problems",
            Self::TestOccurrences => "testOccurrences",
            Self::TestsRunStat => "testsRunStat",
            Self::LogCheckResults => "logCheckResult",
            Self::Changes => "changeInfoFull",
            Self::ChangesLists => "changesList",
            Self::SuitesFailureRunStat => "buildsFailureRunStat",
            Self::Builds => "builds",
            Self::BuildRefs => "buildRefs",
            Self::BuildQueue => "buildQueue",
            Self::RunningBuilds => "runningBuilds",
            Self::DoneMigrations => "doneMigrations",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
