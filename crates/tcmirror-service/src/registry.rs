use std::fmt;
use std::sync::Arc;

use tcmirror_sources::RemoteSource;
use tokio::runtime::Handle;

use crate::caching::{KvStore, WorkerPool};
use crate::config::Config;
use crate::mirror::Mirror;
use crate::trigger::TriggerClock;

/// Creates the remote source of a server.
pub type RemoteFactory = Arc<dyn Fn(&str) -> Arc<dyn RemoteSource> + Send + Sync>;

/// Hands out the [`Mirror`] of each server.
///
/// The first request for a server opens its mirror, which includes running its migrations.
/// Concurrent first requests wait for the same mirror, and all later requests share it.
pub struct MirrorRegistry {
    config: Arc<Config>,
    store: Arc<dyn KvStore>,
    pool: WorkerPool,
    trigger: Arc<TriggerClock>,
    remotes: RemoteFactory,
    mirrors: moka::sync::Cache<String, Arc<Mirror>>,
}

impl fmt::Debug for MirrorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorRegistry")
            .field("store", &self.store)
            .field("pool", &self.pool)
            .field("mirrors", &self.mirrors.entry_count())
            .finish()
    }
}

impl MirrorRegistry {
    /// Creates a registry running remote calls on `runtime`.
    pub fn new<F>(config: Config, store: Arc<dyn KvStore>, runtime: Handle, remotes: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn RemoteSource> + Send + Sync + 'static,
    {
        let pool = WorkerPool::new(runtime, config.workers.max_concurrent_fetches);
        Self {
            config: Arc::new(config),
            store,
            pool,
            trigger: Arc::new(TriggerClock::new()),
            remotes: Arc::new(remotes),
            mirrors: moka::sync::Cache::builder().name("mirrors").build(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The clock shared by all mirrors, updated whenever a build is triggered.
    pub fn trigger_clock(&self) -> &Arc<TriggerClock> {
        &self.trigger
    }

    /// The mirror of `server_id`, opening it on first use.
    pub fn server(&self, server_id: &str) -> Arc<Mirror> {
        self.mirrors.get_with_by_ref(server_id, || {
            tracing::info!(server_id, "Opening mirror");
            let remote = (self.remotes)(server_id);
            Arc::new(Mirror::new(
                server_id,
                remote,
                Arc::clone(&self.store),
                self.pool.clone(),
                Arc::clone(&self.trigger),
                &self.config,
            ))
        })
    }

    /// The mirrors of all configured servers.
    pub fn configured_servers(&self) -> Vec<Arc<Mirror>> {
        self.config
            .servers
            .iter()
            .map(|server| self.server(&server.id))
            .collect()
    }
}
