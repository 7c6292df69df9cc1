//! The commands of the command line application.
//!
//! All mirrors live in memory, so every command starts by reindexing the data it needs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use futures::{StreamExt, stream};
use serde::Serialize;
use tcmirror_service::caching::MemoryStore;
use tcmirror_service::config::Config;
use tcmirror_service::stats::RunStat;
use tcmirror_service::{Mirror, MirrorRegistry};
use tcmirror_sources::{RemoteSnapshot, RemoteSource, SnapshotRemote};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use crate::cli::Ranking;

/// Creates the registry of all configured servers, serving each from its snapshot file.
pub fn create_registry(config: Config, runtime: Handle) -> MirrorRegistry {
    let snapshots: HashMap<String, Option<PathBuf>> = config
        .servers
        .iter()
        .map(|server| (server.id.clone(), server.snapshot.clone()))
        .collect();

    MirrorRegistry::new(
        config,
        Arc::new(MemoryStore::new()),
        runtime,
        move |server_id| -> Arc<dyn RemoteSource> {
            match snapshots.get(server_id).cloned().flatten() {
                Some(path) => Arc::new(SnapshotRemote::from_path(server_id, path)),
                None => {
                    tracing::warn!(server_id, "No snapshot configured, serving an empty server");
                    Arc::new(SnapshotRemote::new(server_id, RemoteSnapshot::default()))
                }
            }
        },
    )
}

/// The mirrors of `server_id`, or of all configured servers.
fn select(registry: &MirrorRegistry, server_id: Option<&str>) -> Result<Vec<Arc<Mirror>>> {
    match server_id {
        Some(server_id) => {
            if registry.config().server(server_id).is_none() {
                bail!("unknown server `{server_id}`");
            }
            Ok(vec![registry.server(server_id)])
        }
        None => Ok(registry.configured_servers()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn reindex_tracked(mirrors: &[Arc<Mirror>]) -> usize {
    let listed = futures::future::join_all(
        mirrors
            .iter()
            .map(|mirror| async move { mirror.full_reindex_tracked().await }),
    )
    .await;
    listed.into_iter().sum()
}

/// Reindexes tracked suites, then actualizes all servers once per interval until Ctrl-C.
pub async fn run(registry: &MirrorRegistry) -> Result<()> {
    tcmirror_service::metric!(counter("mirror.starting") += 1);

    let mirrors = registry.configured_servers();
    if mirrors.is_empty() {
        bail!("no servers configured");
    }

    let actualizer = &registry.config().actualizer;
    if actualizer.reindex_on_start {
        let listed = reindex_tracked(&mirrors).await;
        tracing::info!(listed, "Reindexed tracked suites");
    }

    let mut interval = tokio::time::interval(actualizer.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                tracing::info!("Shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                for (mirror, report) in mirrors.iter().zip(actualize_all(&mirrors).await) {
                    tracing::info!(server_id = mirror.server_id(), ?report, "Actualized builds");
                }
            }
        }
    }
}

async fn actualize_all(mirrors: &[Arc<Mirror>]) -> Vec<tcmirror_service::ActualizationReport> {
    futures::future::join_all(
        mirrors
            .iter()
            .map(|mirror| async move { mirror.actualize_recent_builds().await }),
    )
    .await
}

pub async fn reindex(
    registry: &MirrorRegistry,
    server_id: Option<&str>,
    suite_id: Option<&str>,
    branch: &str,
) -> Result<()> {
    let mirrors = select(registry, server_id)?;
    match suite_id {
        Some(suite_id) => {
            for mirror in &mirrors {
                let listed = mirror.full_reindex(suite_id, branch).await?;
                print_json(&serde_json::json!({
                    "server": mirror.server_id(),
                    "suite": suite_id,
                    "listed": listed,
                }))?;
            }
        }
        None => {
            for mirror in &mirrors {
                let listed = mirror.full_reindex_tracked().await;
                print_json(&serde_json::json!({
                    "server": mirror.server_id(),
                    "listed": listed,
                }))?;
            }
        }
    }
    Ok(())
}

pub async fn actualize(registry: &MirrorRegistry, server_id: Option<&str>) -> Result<()> {
    let mirrors = select(registry, server_id)?;
    reindex_tracked(&mirrors).await;
    for (mirror, report) in mirrors.iter().zip(actualize_all(&mirrors).await) {
        print_json(&serde_json::json!({
            "server": mirror.server_id(),
            "report": report,
        }))?;
    }
    Ok(())
}

pub async fn history(
    registry: &MirrorRegistry,
    server_id: &str,
    suite_id: &str,
    branch: &str,
) -> Result<()> {
    let mirror = select(registry, Some(server_id))?.remove(0);
    mirror.full_reindex(suite_id, branch).await?;
    for build_ref in mirror.get_build_history(suite_id, branch) {
        print_json(&build_ref)?;
    }
    Ok(())
}

/// Loads the finished builds of all tracked suites and their tests, feeding the statistics.
///
/// Returns the number of loaded builds. Builds that fail to load are logged and skipped.
async fn load_tracked_runs(mirror: &Mirror, concurrency: usize) -> usize {
    let hrefs: Vec<String> = mirror
        .tracked_chains()
        .iter()
        .flat_map(|(chain, branch)| mirror.get_build_history(&chain.suite_id, branch))
        .filter(|build_ref| build_ref.is_finished())
        .map(|build_ref| build_ref.href())
        .collect();

    stream::iter(hrefs)
        .map(|href| async move {
            let build = match mirror.get_build(&href).await {
                Ok(build) => build,
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        href,
                        "Failed to load build"
                    );
                    return false;
                }
            };
            if let Some(tests) = build.test_occurrences_href.as_deref() {
                if let Err(err) = mirror.get_tests(tests).await {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        href = tests,
                        "Failed to load tests"
                    );
                }
            }
            true
        })
        .buffer_unordered(concurrency.max(1))
        .filter(|loaded| futures::future::ready(*loaded))
        .count()
        .await
}

fn rank(mirror: &Mirror, ranking: Ranking, n: usize) -> Vec<RunStat> {
    let stats = mirror.stats();
    match ranking {
        Ranking::FailingTests => stats.top_by_failure_rate(n),
        Ranking::SlowTests => stats.top_by_average_duration(n),
        Ranking::FailingSuites => stats.top_failing_suites(n),
    }
}

pub async fn top(
    registry: &MirrorRegistry,
    server_id: Option<&str>,
    ranking: Ranking,
    n: usize,
) -> Result<()> {
    let mirrors = select(registry, server_id)?;
    let concurrency = registry.config().workers.max_concurrent_fetches;
    reindex_tracked(&mirrors).await;

    for mirror in &mirrors {
        let loaded = load_tracked_runs(mirror, concurrency).await;
        tracing::info!(server_id = mirror.server_id(), loaded, "Loaded tracked runs");

        for stat in rank(mirror, ranking, n) {
            print_json(&serde_json::json!({
                "server": mirror.server_id(),
                "name": stat.name,
                "runs": stat.runs,
                "failures": stat.failures,
                "failure_rate": stat.failure_rate(),
                "average_duration_ms": stat.average_duration_ms(),
            }))?;
        }
    }
    Ok(())
}
