use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tcmirror_sources::{Build, Status, TestOccurrence};

/// A single run folded into a [`RunStat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSample {
    pub build_id: Option<u64>,
    pub failed: bool,
    pub duration_ms: Option<u64>,
}

impl RunSample {
    pub fn from_test(occurrence: &TestOccurrence) -> Self {
        Self {
            build_id: occurrence.build_id(),
            failed: occurrence.is_failed(),
            duration_ms: occurrence.duration_ms,
        }
    }

    pub fn from_build(build: &Build) -> Self {
        Self {
            build_id: Some(build.id()),
            failed: build.build_ref.status != Status::Success,
            duration_ms: build.duration().map(|d| d.as_millis() as u64),
        }
    }
}

/// Run statistics of a test or a suite.
///
/// The all-time counters only ever grow. The `latest` window keeps the most recent samples, up
/// to the window size given when folding in a sample. A run of a build that is still in the
/// window is not counted again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStat {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    /// Runs that reported a duration.
    pub timed_runs: u64,
    pub latest: VecDeque<RunSample>,
}

impl RunStat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_test_run(&mut self, occurrence: &TestOccurrence, window: usize) -> bool {
        self.add_sample(RunSample::from_test(occurrence), window)
    }

    pub fn add_build_run(&mut self, build: &Build, window: usize) -> bool {
        self.add_sample(RunSample::from_build(build), window)
    }

    /// Whether a run of `build_id` is in the latest window.
    pub fn contains_build(&self, build_id: u64) -> bool {
        self.latest.iter().any(|s| s.build_id == Some(build_id))
    }

    /// Folds `sample` into the counters, returning whether it was counted.
    pub fn add_sample(&mut self, sample: RunSample, window: usize) -> bool {
        if let Some(build_id) = sample.build_id {
            if self.contains_build(build_id) {
                return false;
            }
        }

        self.runs = self.runs.saturating_add(1);
        if sample.failed {
            self.failures = self.failures.saturating_add(1);
        }
        if let Some(duration) = sample.duration_ms {
            self.total_duration_ms = self.total_duration_ms.saturating_add(duration);
            self.timed_runs = self.timed_runs.saturating_add(1);
        }

        if window == 0 {
            self.latest.clear();
            return true;
        }
        while self.latest.len() >= window {
            self.latest.pop_front();
        }
        self.latest.push_back(sample);
        true
    }

    /// Share of failed runs, between `0.0` and `1.0`.
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.runs)
    }

    pub fn average_duration_ms(&self) -> f64 {
        ratio(self.total_duration_ms, self.timed_runs)
    }

    /// Share of failed runs within the latest window.
    pub fn latest_failure_rate(&self) -> f64 {
        let failures = self.latest.iter().filter(|s| s.failed).count();
        ratio(failures as u64, self.latest.len() as u64)
    }

    pub fn latest_average_duration_ms(&self) -> f64 {
        let durations: Vec<u64> = self.latest.iter().filter_map(|s| s.duration_ms).collect();
        ratio(durations.iter().sum(), durations.len() as u64)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
