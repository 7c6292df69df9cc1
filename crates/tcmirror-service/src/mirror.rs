//! The per-server facade of the mirror.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tcmirror_sources::{
    Build, BuildRef, Change, ChainAtServer, ChangesList, LogCheckResult, ProblemOccurrences,
    RemoteSource, Statistics, TestOccurrenceFull, TestOccurrences, VersionedEntity, build_href,
};

use crate::actualizer::{ActualizationReport, Actualizer};
use crate::caching::{
    CacheEntry, CacheEntryExt, CacheError, CacheName, InFlight, KvStore, SharedFetch, Tables,
    WorkerPool, gateway, merge_by_id,
};
use crate::config::{CacheConfigs, Config};
use crate::migrations;
use crate::stats::StatsAggregator;
use crate::trigger::TriggerClock;

/// Removes the `count:N` dimension from a locator href.
///
/// Occurrences are stored under the stripped href, so requesting a different page size does
/// not reload them.
pub fn strip_count_locator(href: &str) -> Cow<'_, str> {
    let Some(start) = href.find("count:") else {
        return Cow::Borrowed(href);
    };
    let digits = href[start + "count:".len()..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(href.len(), |offset| start + "count:".len() + offset);

    // take one of the adjacent separators with it
    let (from, to) = if start > 0 && href[..start].ends_with(',') {
        (start - 1, digits)
    } else if href[digits..].starts_with(',') {
        (start, digits + 1)
    } else {
        (start, digits)
    };
    Cow::Owned(format!("{}{}", &href[..from], &href[to..]))
}

fn history_key(suite_id: &str, branch: &str) -> String {
    format!("{suite_id}:{branch}")
}

/// The mirror of one remote CI server.
///
/// All operations may be called concurrently from any task.
#[derive(Debug)]
pub struct Mirror {
    server_id: String,
    remote: Arc<dyn RemoteSource>,
    tables: Tables,
    stats: StatsAggregator,
    actualizer: Actualizer,
    trigger: Arc<TriggerClock>,
    caches: CacheConfigs,
    stat_update_enabled: Arc<AtomicBool>,
    tracked: Vec<(ChainAtServer, String)>,
    builds: InFlight<Build>,
    tests: InFlight<TestOccurrences>,
    test_full: InFlight<TestOccurrenceFull>,
    queued: InFlight<Vec<BuildRef>>,
    running: InFlight<Vec<BuildRef>>,
    log_checks: InFlight<LogCheckResult>,
}

impl Mirror {
    /// Opens the mirror of `server_id`, applying pending migrations first.
    pub fn new(
        server_id: &str,
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn KvStore>,
        pool: WorkerPool,
        trigger: Arc<TriggerClock>,
        config: &Config,
    ) -> Self {
        let tables = Tables::open(store, server_id);
        let stats = StatsAggregator::new(
            tables.tests_run_stat.clone(),
            tables.suites_failure_run_stat.clone(),
            config.stats.latest_window,
        );
        let actualizer = Actualizer::new(
            Arc::clone(&remote),
            tables.build_refs.clone(),
            config.default_branch.clone(),
            config.workers.max_concurrent_fetches,
        );
        let tracked = config
            .server(server_id)
            .map(|server| {
                server
                    .chains(&config.default_branch)
                    .map(|(chain, branch)| (chain, branch.to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let applied = migrations::run(&tables, &stats);
        if !applied.is_empty() {
            tracing::info!(server_id, ?applied, "Applied migrations");
        }

        Self {
            server_id: server_id.to_owned(),
            remote,
            stats,
            actualizer,
            trigger,
            caches: config.caches,
            stat_update_enabled: Arc::new(AtomicBool::new(config.stats.enabled)),
            tracked,
            builds: InFlight::new(CacheName::Builds, pool.clone()),
            tests: InFlight::new(CacheName::TestOccurrences, pool.clone()),
            test_full: InFlight::new(CacheName::TestOccurrenceFull, pool.clone()),
            queued: InFlight::new(CacheName::BuildQueue, pool.clone()),
            running: InFlight::new(CacheName::RunningBuilds, pool.clone()),
            log_checks: InFlight::new(CacheName::LogCheckResults, pool),
            tables,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn host(&self) -> &str {
        self.remote.host()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn actualizer(&self) -> &Actualizer {
        &self.actualizer
    }

    /// The configured tracked chains with their branches.
    pub fn tracked_chains(&self) -> &[(ChainAtServer, String)] {
        &self.tracked
    }

    pub fn stat_update_enabled(&self) -> bool {
        self.stat_update_enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables the statistics updates caused by loading builds and tests.
    pub fn set_stat_update_enabled(&self, enabled: bool) {
        self.stat_update_enabled.store(enabled, Ordering::Relaxed);
    }

    /// The finished builds of a suite in a branch, in ascending id order.
    ///
    /// Builds that dropped out of the remote history are kept.
    pub async fn get_finished_builds(
        &self,
        suite_id: &str,
        branch: &str,
    ) -> CacheEntry<Vec<BuildRef>> {
        let branch = self.actualizer.normalize_branch(branch);
        let ttl = self.caches.finished_builds_ttl.as_secs();
        let key = history_key(suite_id, branch);

        gateway::load_or_merge(&self.tables.finished_builds, &key, ttl, |persisted| async move {
            metric!(counter("remote.fetch") += 1, "op" => "list_finished_builds");
            let fetched = self
                .remote
                .list_finished_builds(suite_id, branch)
                .await
                .map_err(CacheError::from)
                .or_stub_if_missing(Vec::new)?;
            self.advance_all(&fetched);
            Ok::<_, CacheError>(merge_by_id(persisted, fetched))
        })
        .await
    }

    /// Like [`get_finished_builds`](Self::get_finished_builds), but including builds that
    /// failed because of their snapshot dependencies.
    pub async fn get_finished_builds_include_failed(
        &self,
        suite_id: &str,
        branch: &str,
    ) -> CacheEntry<Vec<BuildRef>> {
        let branch = self.actualizer.normalize_branch(branch);
        let ttl = self.caches.finished_builds_ttl.as_secs();
        let key = history_key(suite_id, branch);

        gateway::load_or_merge(
            &self.tables.finished_builds_include_failed,
            &key,
            ttl,
            |persisted| async move {
                metric!(counter("remote.fetch") += 1, "op" => "list_finished_builds_include_failed");
                let fetched = self
                    .remote
                    .list_finished_builds_include_failed(suite_id, branch)
                    .await
                    .map_err(CacheError::from)
                    .or_stub_if_missing(Vec::new)?;
                self.advance_all(&fetched);
                Ok::<_, CacheError>(merge_by_id(persisted, fetched))
            },
        )
        .await
    }

    fn advance_all(&self, build_refs: &[BuildRef]) {
        for build_ref in build_refs {
            self.actualizer.advance(build_ref);
        }
    }

    /// The build queue, optionally restricted to a branch.
    ///
    /// Right after a build was triggered, the cached queue is refreshed more often.
    pub fn get_queued_builds(&self, branch: Option<&str>) -> SharedFetch<Vec<BuildRef>> {
        let default_ttl = self.caches.queued_builds_ttl.as_secs();
        let ttl = self.trigger.cache_valid_secs(default_ttl);
        let remote = Arc::clone(&self.remote);
        let owned_branch = branch.map(str::to_owned);

        self.queued.load_async_if_absent_or_expired(
            &self.tables.build_queue,
            branch.unwrap_or_default(),
            ttl,
            ttl == default_ttl,
            move || async move {
                metric!(counter("remote.fetch") += 1, "op" => "list_queued_builds");
                remote
                    .list_queued_builds(owned_branch.as_deref())
                    .await
                    .map_err(CacheError::from)
            },
        )
    }

    /// The running builds, optionally restricted to a branch.
    ///
    /// Right after a build was triggered, the cached list is refreshed more often.
    pub fn get_running_builds(&self, branch: Option<&str>) -> SharedFetch<Vec<BuildRef>> {
        let default_ttl = self.caches.running_builds_ttl.as_secs();
        let ttl = self.trigger.cache_valid_secs(default_ttl);
        let remote = Arc::clone(&self.remote);
        let owned_branch = branch.map(str::to_owned);

        self.running.load_async_if_absent_or_expired(
            &self.tables.running_builds,
            branch.unwrap_or_default(),
            ttl,
            ttl == default_ttl,
            move || async move {
                metric!(counter("remote.fetch") += 1, "op" => "list_running_builds");
                remote
                    .list_running_builds(owned_branch.as_deref())
                    .await
                    .map_err(CacheError::from)
            },
        )
    }

    /// The full details of a build.
    ///
    /// Builds unknown to the remote server are stored as stubs, so they are not requested
    /// again. Builds that have not finished yet are not stored. Concurrent requests for the
    /// same build share one remote call, and a build is added to the suite statistics only when
    /// it is stored for the first time.
    pub async fn get_build(&self, href: &str) -> CacheEntry<Build> {
        if let Some(stored) = self.tables.builds.get(href).filter(|b| !b.is_outdated()) {
            let name = CacheName::Builds;
            metric!(counter("caches.access") += 1, "cache" => name.as_ref());
            metric!(counter("caches.store.hit") += 1, "cache" => name.as_ref());
            return Ok(stored);
        }

        let remote = Arc::clone(&self.remote);
        let table = self.tables.builds.clone();
        let stats = self.stats.clone();
        let actualizer = self.actualizer.clone();
        let stat_update_enabled = Arc::clone(&self.stat_update_enabled);
        let owned_href = href.to_owned();

        self.builds
            .load_async(href, move || async move {
                let loaded = gateway::load_versioned(
                    &table,
                    &owned_href,
                    || async {
                        metric!(counter("remote.fetch") += 1, "op" => "get_build");
                        remote
                            .get_build(&owned_href)
                            .await
                            .map_err(CacheError::from)
                            .or_stub_if_missing(Build::fake_stub)
                    },
                    |build| build.fake_stub || build.has_finish_date(),
                )
                .await?;

                if loaded.is_saved() && !loaded.value.fake_stub {
                    if loaded.is_freshly_saved() && stat_update_enabled.load(Ordering::Relaxed) {
                        stats.record_build_run(loaded.value.suite_id(), &loaded.value);
                    }
                    actualizer.advance(&loaded.value.build_ref);
                }
                Ok::<_, CacheError>(loaded.value)
            })
            .await
    }

    /// The full details of a build, by id.
    pub async fn get_build_by_id(&self, build_id: u64) -> CacheEntry<Build> {
        self.get_build(&build_href(build_id)).await
    }

    /// The test occurrences behind `href`.
    ///
    /// Concurrent requests share one remote call. Freshly loaded occurrences are added to the
    /// test statistics once.
    pub async fn get_tests(&self, href: &str) -> CacheEntry<TestOccurrences> {
        let key = strip_count_locator(href).into_owned();
        if let Some(stored) = self.tables.test_occurrences.get(&key) {
            let name = CacheName::TestOccurrences;
            metric!(counter("caches.access") += 1, "cache" => name.as_ref());
            metric!(counter("caches.store.hit") += 1, "cache" => name.as_ref());
            return Ok(stored);
        }

        let remote = Arc::clone(&self.remote);
        let table = self.tables.test_occurrences.clone();
        let stats = self.stats.clone();
        let stat_update_enabled = Arc::clone(&self.stat_update_enabled);
        let owned_href = href.to_owned();
        let owned_key = key.clone();

        self.tests
            .load_async(&key, move || async move {
                gateway::load_if_absent(&table, &owned_key, || async {
                    metric!(counter("remote.fetch") += 1, "op" => "get_test_occurrences");
                    let tests = remote
                        .get_test_occurrences(&owned_href)
                        .await
                        .map_err(CacheError::from)
                        .or_stub_if_missing(TestOccurrences::default)?;
                    metric!(histogram("remote.test_occurrences") = tests.occurrences.len() as u64);
                    if stat_update_enabled.load(Ordering::Relaxed) {
                        stats.record_test_runs(&tests);
                    }
                    Ok::<_, CacheError>(tests)
                })
                .await
            })
            .await
    }

    pub async fn get_problems(&self, href: &str) -> CacheEntry<ProblemOccurrences> {
        gateway::load_if_absent(&self.tables.problems, href, || async {
            metric!(counter("remote.fetch") += 1, "op" => "get_problems");
            self.remote
                .get_problems(href)
                .await
                .map_err(CacheError::from)
        })
        .await
    }

    /// The statistic values of a build, empty if the remote server has none.
    pub async fn get_build_stat(&self, href: &str) -> CacheEntry<Statistics> {
        gateway::load_if_absent(&self.tables.build_statistics, href, || async {
            metric!(counter("remote.fetch") += 1, "op" => "get_build_statistics");
            self.remote
                .get_build_statistics(href)
                .await
                .map_err(CacheError::from)
                .or_stub_if_missing(Statistics::default)
        })
        .await
    }

    /// A change, empty if the remote server does not know it or returns garbage.
    pub async fn get_change(&self, href: &str) -> CacheEntry<Change> {
        gateway::load_if_absent(&self.tables.changes, href, || async {
            metric!(counter("remote.fetch") += 1, "op" => "get_change");
            self.remote
                .get_change(href)
                .await
                .map_err(CacheError::from)
                .or_stub_if_missing(Change::default)
                .or_empty_if_malformed(Change::default)
        })
        .await
    }

    /// A list of changes, empty if the remote server does not know it.
    pub async fn get_changes_list(&self, href: &str) -> CacheEntry<ChangesList> {
        gateway::load_if_absent(&self.tables.changes_lists, href, || async {
            metric!(counter("remote.fetch") += 1, "op" => "get_changes_list");
            self.remote
                .get_changes_list(href)
                .await
                .map_err(CacheError::from)
                .or_stub_if_missing(ChangesList::default)
        })
        .await
    }

    /// The details of a test occurrence, loaded on the worker pool.
    pub fn get_test_full(&self, href: &str) -> SharedFetch<TestOccurrenceFull> {
        let remote = Arc::clone(&self.remote);
        let owned_href = href.to_owned();
        self.test_full
            .load_async_if_absent(&self.tables.test_occurrence_full, href, move || async move {
                metric!(counter("remote.fetch") += 1, "op" => "get_test_occurrence_full");
                remote
                    .get_test_occurrence_full(&owned_href)
                    .await
                    .map_err(CacheError::from)
            })
    }

    /// Checks the log of a build, loaded on the worker pool.
    ///
    /// Results of older log checks are checked again.
    pub fn analyze_build_log(&self, build_id: u64) -> SharedFetch<LogCheckResult> {
        let remote = Arc::clone(&self.remote);
        self.log_checks.load_async_if_absent_versioned(
            &self.tables.log_check_results,
            &build_id.to_string(),
            move || async move {
                metric!(counter("remote.fetch") += 1, "op" => "analyze_build_log");
                remote
                    .analyze_build_log(build_id)
                    .await
                    .map_err(CacheError::from)
            },
        )
    }

    /// The last thread dump of a build log, if its check result is stored.
    pub fn thread_dump_cached(&self, build_id: u64) -> Option<String> {
        self.tables
            .log_check_results
            .get(&build_id.to_string())?
            .last_thread_dump
    }

    /// The raw log of a build. Logs are not stored.
    pub async fn download_build_log(&self, build_id: u64) -> CacheEntry<Vec<u8>> {
        metric!(counter("remote.fetch") += 1, "op" => "download_build_log");
        Ok(self.remote.download_build_log(build_id).await?)
    }

    /// Queues a build of a suite, and stores the reference of the queued build.
    pub async fn trigger_build(
        &self,
        suite_id: &str,
        branch: &str,
        queue_at_top: bool,
    ) -> CacheEntry<BuildRef> {
        self.trigger.record_trigger();
        let branch = self.actualizer.normalize_branch(branch);

        metric!(counter("remote.fetch") += 1, "op" => "trigger_build");
        let queued = self
            .remote
            .trigger_build(suite_id, branch, queue_at_top)
            .await?;
        self.actualizer.advance(&queued);
        tracing::info!(
            server_id = %self.server_id,
            suite_id,
            branch,
            build_id = queued.id,
            "Triggered build"
        );
        Ok(queued)
    }

    pub async fn full_reindex(&self, suite_id: &str, branch: &str) -> CacheEntry<usize> {
        self.actualizer.full_reindex(suite_id, branch).await
    }

    /// Reindexes all tracked chains, returning the number of listed references.
    ///
    /// Chains that fail to reindex are logged and skipped.
    pub async fn full_reindex_tracked(&self) -> usize {
        let mut listed = 0;
        for (chain, branch) in &self.tracked {
            match self.full_reindex(&chain.suite_id, branch).await {
                Ok(count) => listed += count,
                Err(err) => {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        %chain,
                        branch = branch.as_str(),
                        "Failed to reindex tracked chain"
                    );
                }
            }
        }
        listed
    }

    pub async fn actualize_recent_builds(&self) -> ActualizationReport {
        self.actualizer.actualize_recent_builds().await
    }

    pub fn get_build_history(&self, suite_id: &str, branch: &str) -> Vec<BuildRef> {
        self.actualizer.get_build_history(suite_id, branch)
    }
}
