//! Keeps the stored build references of a server up to date.
//!
//! Build references move through `queued → running → finished` (or straight from `queued` to
//! `finished`) on the remote server. The [`Actualizer`] discovers new builds by reindexing the
//! history of a suite, and advances stored references that are not finished yet. Finished
//! references are never changed again, and references never move backwards.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use serde::Serialize;
use tcmirror_sources::{BuildRef, RemoteError, RemoteResult, RemoteSource};

use crate::caching::{CacheEntry, Table};

/// Branch alias resolving to the configured default branch.
pub const DEFAULT_BRANCH_ALIAS: &str = "<default>";

/// Outcome of [`Actualizer::actualize_recent_builds`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActualizationReport {
    /// Stored references that were not finished before the run.
    pub checked: usize,
    /// References written during the run, including newly discovered ones.
    pub updated: usize,
    /// Checked references that are still not finished after the run.
    pub pending: usize,
    /// Checked references whose state could not be determined because of remote errors.
    pub failed: usize,
    /// Checked references the remote server does not know anymore.
    pub missing: usize,
}

/// Advances the build references of one server.
#[derive(Debug, Clone)]
pub struct Actualizer {
    remote: Arc<dyn RemoteSource>,
    build_refs: Table<BuildRef>,
    default_branch: String,
    max_concurrent_fetches: usize,
}

fn ref_key(id: u64) -> String {
    id.to_string()
}

/// Treats a list the remote server does not know as empty.
fn or_empty<T>(result: RemoteResult<Vec<T>>) -> RemoteResult<Vec<T>> {
    match result {
        Err(RemoteError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

impl Actualizer {
    /// Creates an actualizer fetching at most `max_concurrent_fetches` single builds at a time.
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        build_refs: Table<BuildRef>,
        default_branch: impl Into<String>,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            remote,
            build_refs,
            default_branch: default_branch.into(),
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    /// Resolves an empty branch or [`DEFAULT_BRANCH_ALIAS`] to the default branch.
    pub fn normalize_branch<'a>(&'a self, branch: &'a str) -> &'a str {
        if branch.is_empty() || branch == DEFAULT_BRANCH_ALIAS {
            &self.default_branch
        } else {
            branch
        }
    }

    /// Stores `candidate` if it is new, or if it is a valid successor of the stored reference.
    ///
    /// Returns whether the stored reference changed.
    pub fn advance(&self, candidate: &BuildRef) -> bool {
        let updated = self.build_refs.update(&ref_key(candidate.id), |stored| match stored {
            None => Some(candidate.clone()),
            Some(stored) if stored.state.is_terminal() || stored == *candidate => None,
            Some(stored)
                if stored.state == candidate.state
                    || stored.state.can_advance_to(candidate.state) =>
            {
                Some(candidate.clone())
            }
            Some(stored) => {
                tracing::debug!(
                    build_id = candidate.id,
                    from = %stored.state,
                    to = %candidate.state,
                    "Rejected backwards build state transition"
                );
                None
            }
        });
        updated.is_some()
    }

    /// Stores a reference as reported by a full listing.
    ///
    /// Unlike [`advance`](Self::advance), non-terminal stored references are overwritten
    /// unconditionally. Finished references are kept.
    fn reindex_ref(&self, candidate: &BuildRef) -> bool {
        let updated = self.build_refs.update(&ref_key(candidate.id), |stored| match stored {
            Some(stored) if stored.state.is_terminal() || stored == *candidate => None,
            _ => Some(candidate.clone()),
        });
        updated.is_some()
    }

    /// Loads the complete history of `suite_id` in `branch`, including queued and running
    /// builds, and stores all of its references.
    ///
    /// Returns the number of references listed by the remote server.
    pub async fn full_reindex(&self, suite_id: &str, branch: &str) -> CacheEntry<usize> {
        let branch = self.normalize_branch(branch);
        let start = Instant::now();

        metric!(counter("remote.fetch") += 1, "op" => "list_finished_builds_include_failed");
        let finished =
            or_empty(self.remote.list_finished_builds_include_failed(suite_id, branch).await)?;
        metric!(counter("remote.fetch") += 1, "op" => "list_queued_builds");
        let queued = or_empty(self.remote.list_queued_builds(Some(branch)).await)?;
        metric!(counter("remote.fetch") += 1, "op" => "list_running_builds");
        let running = or_empty(self.remote.list_running_builds(Some(branch)).await)?;

        let mut listed = 0;
        let mut updated = 0;
        let suite_refs = finished
            .iter()
            .chain(&queued)
            .chain(&running)
            .filter(|build_ref| build_ref.build_type_id == suite_id);
        for build_ref in suite_refs {
            listed += 1;
            if self.reindex_ref(build_ref) {
                updated += 1;
            }
        }

        metric!(timer("actualizer.reindex.duration") = start.elapsed());
        tracing::info!(suite_id, branch, listed, updated, "Reindexed build history");
        Ok(listed)
    }

    /// Advances all stored references that are not finished yet.
    ///
    /// The queued and running builds and the finished history of every affected suite and
    /// branch are listed once. References missing from all of these lists are fetched one by
    /// one, with at most `max_concurrent_fetches` requests at a time. Remote errors for single
    /// references are counted in the report and do not abort the run.
    pub async fn actualize_recent_builds(&self) -> ActualizationReport {
        let start = Instant::now();
        let pending: Vec<BuildRef> = self
            .build_refs
            .values()
            .filter(|build_ref| !build_ref.state.is_terminal())
            .collect();

        let mut report = ActualizationReport {
            checked: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return report;
        }

        let mut groups: BTreeMap<(&str, &str), Vec<u64>> = BTreeMap::new();
        for build_ref in &pending {
            let branch = self.normalize_branch(&build_ref.branch_name);
            groups
                .entry((build_ref.build_type_id.as_str(), branch))
                .or_default()
                .push(build_ref.id);
        }

        let mut listed = HashSet::new();
        let mut candidates = Vec::new();

        metric!(counter("remote.fetch") += 1, "op" => "list_queued_builds");
        let queued = self.remote.list_queued_builds(None).await;
        metric!(counter("remote.fetch") += 1, "op" => "list_running_builds");
        let running = self.remote.list_running_builds(None).await;
        for (kind, list) in [("queued", queued), ("running", running)] {
            match or_empty(list) {
                Ok(list) => candidates.extend(list),
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        kind,
                        "Failed to list builds, checking them one by one"
                    );
                }
            }
        }

        for ((suite_id, branch), ids) in &groups {
            metric!(counter("remote.fetch") += 1, "op" => "list_finished_builds_include_failed");
            match or_empty(
                self.remote
                    .list_finished_builds_include_failed(suite_id, branch)
                    .await,
            ) {
                Ok(list) => candidates.extend(list),
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        suite_id,
                        branch,
                        pending = ids.len(),
                        "Failed to list finished builds, checking them one by one"
                    );
                }
            }
        }

        for candidate in &candidates {
            listed.insert(candidate.id);
            if self.advance(candidate) {
                report.updated += 1;
            }
        }

        let unlisted = pending
            .iter()
            .filter(|build_ref| !listed.contains(&build_ref.id))
            .map(|build_ref| async move {
                metric!(counter("remote.fetch") += 1, "op" => "get_build");
                (build_ref.id, self.remote.get_build(&build_ref.href()).await)
            });
        let fetched: Vec<_> = stream::iter(unlisted)
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;
        for (id, fetched) in fetched {
            match fetched {
                Ok(build) => {
                    if self.advance(&build.build_ref) {
                        report.updated += 1;
                    }
                }
                Err(RemoteError::NotFound) => {
                    tracing::debug!(build_id = id, "Pending build is gone from the remote server");
                    report.missing += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        build_id = id,
                        "Failed to actualize build"
                    );
                    report.failed += 1;
                }
            }
        }

        report.pending = pending
            .iter()
            .filter_map(|build_ref| self.build_refs.get(&ref_key(build_ref.id)))
            .filter(|build_ref| !build_ref.state.is_terminal())
            .count();

        metric!(counter("actualizer.checked") += report.checked as i64);
        metric!(counter("actualizer.updated") += report.updated as i64);
        metric!(counter("actualizer.failed") += report.failed as i64);
        metric!(counter("actualizer.missing") += report.missing as i64);
        metric!(gauge("actualizer.pending") = report.pending as u64);
        metric!(timer("actualizer.duration") = start.elapsed());
        tracing::info!(?report, "Actualized recent builds");
        report
    }

    /// The stored references of `suite_id` in `branch`, in ascending id order.
    pub fn get_build_history(&self, suite_id: &str, branch: &str) -> Vec<BuildRef> {
        let branch = self.normalize_branch(branch);
        let mut history: Vec<BuildRef> = self
            .build_refs
            .values()
            .filter(|build_ref| {
                build_ref.build_type_id == suite_id
                    && self.normalize_branch(&build_ref.branch_name) == branch
            })
            .collect();
        history.sort_by_key(|build_ref| build_ref.id);
        history
    }

    /// The stored reference of a build.
    pub fn build_ref(&self, build_id: u64) -> Option<BuildRef> {
        self.build_refs.get(&ref_key(build_id))
    }
}
