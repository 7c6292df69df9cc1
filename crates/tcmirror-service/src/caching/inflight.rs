use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tcmirror_sources::VersionedEntity;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};

use super::{CacheEntry, CacheError, CacheName, Expirable, Table};
use crate::utils::defer::defer;

/// A handle to a load that completes exactly once.
///
/// Handles can be cloned and awaited by any number of waiters, which all observe the same
/// result. Dropping a handle does not cancel the load.
pub type SharedFetch<V> = Shared<BoxFuture<'static, CacheEntry<V>>>;

fn ready<V>(entry: CacheEntry<V>) -> SharedFetch<V>
where
    V: Clone + Send + Sync + 'static,
{
    futures::future::ready(entry).boxed().shared()
}

/// A bounded pool executing remote calls.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool running at most `max_concurrent` calls at a time on `runtime`.
    pub fn new(runtime: Handle, max_concurrent: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Spawns `future` on the pool, where it waits for a free slot.
    ///
    /// The future runs to completion even if nobody waits for its result.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => future.await,
                Err(err) => {
                    tracing::error!(error = &err as &dyn std::error::Error, "Worker pool closed");
                }
            }
        });
    }
}

/// Coalesces concurrent loads of the same key into a single remote call.
///
/// The first request for a key spawns the load on the [`WorkerPool`] and registers it. Every
/// request for that key arriving while the load runs gets a clone of the same
/// [`SharedFetch`]. Once done, successful or not, the key is unregistered again.
pub struct InFlight<V> {
    name: CacheName,
    pool: WorkerPool,
    running: Arc<Mutex<HashMap<String, SharedFetch<V>>>>,
}

impl<V> fmt::Debug for InFlight<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self.running.lock().unwrap().len();
        f.debug_struct("InFlight")
            .field("name", &self.name)
            .field("running", &running)
            .finish()
    }
}

impl<V> InFlight<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(name: CacheName, pool: WorkerPool) -> Self {
        Self {
            name,
            pool,
            running: Default::default(),
        }
    }

    /// The number of loads currently running.
    pub fn running(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Joins the running load for `key`, or starts one with `fetch`.
    ///
    /// `fetch` is only called when a new load is started.
    pub fn load_async<F, Fut>(&self, key: &str, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let mut running = self.running.lock().unwrap();
        if let Some(load) = running.get(key) {
            metric!(counter("caches.inflight.join") += 1, "cache" => self.name.as_ref());
            return load.clone();
        }
        metric!(counter("caches.inflight.start") += 1, "cache" => self.name.as_ref());

        let done = {
            let running = Arc::clone(&self.running);
            let key = key.to_owned();
            defer(move || {
                running.lock().unwrap().remove(&key);
            })
        };
        let (sender, receiver) = oneshot::channel();
        let load = async move {
            receiver
                .await
                .unwrap_or_else(|err| Err(CacheError::from_std_error(err)))
        }
        .boxed()
        .shared();
        running.insert(key.to_owned(), load.clone());
        drop(running);

        let fetch = fetch();
        self.pool.spawn(async move {
            let entry = fetch.await;
            // unregister first, so waiters never observe a finished load that is still registered
            drop(done);
            // all waiters may be gone already
            let _ = sender.send(entry);
        });
        load
    }

    /// Serves the stored value for `key`, or loads and stores it.
    pub fn load_async_if_absent<F, Fut>(&self, table: &Table<V>, key: &str, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1, "cache" => self.name.as_ref());
        if let Some(stored) = table.get(key) {
            metric!(counter("caches.store.hit") += 1, "cache" => self.name.as_ref());
            return ready(Ok(stored));
        }
        metric!(counter("caches.store.miss") += 1, "cache" => self.name.as_ref());
        self.load_and_store(table, key, fetch)
    }

    /// Serves the stored value for `key` unless it is outdated, or loads and stores it.
    pub fn load_async_if_absent_versioned<F, Fut>(
        &self,
        table: &Table<V>,
        key: &str,
        fetch: F,
    ) -> SharedFetch<V>
    where
        V: VersionedEntity,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1, "cache" => self.name.as_ref());
        match table.get(key) {
            Some(stored) if !stored.is_outdated() => {
                metric!(counter("caches.store.hit") += 1, "cache" => self.name.as_ref());
                return ready(Ok(stored));
            }
            Some(_) => {
                metric!(counter("caches.store.outdated") += 1, "cache" => self.name.as_ref());
            }
            None => {
                metric!(counter("caches.store.miss") += 1, "cache" => self.name.as_ref());
            }
        }
        self.load_and_store(table, key, fetch)
    }

    /// Serves the stored value for `key` while it is younger than `ttl_secs`, or refreshes it.
    ///
    /// With `serve_stale`, an expired stored value is served right away while the refresh
    /// runs in the background.
    pub fn load_async_if_absent_or_expired<F, Fut>(
        &self,
        table: &Table<Expirable<V>>,
        key: &str,
        ttl_secs: u64,
        serve_stale: bool,
        fetch: F,
    ) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1, "cache" => self.name.as_ref());
        let persisted = table.get(key);
        match &persisted {
            Some(stored) if stored.is_age_less_than_secs(ttl_secs) => {
                metric!(counter("caches.store.hit") += 1, "cache" => self.name.as_ref());
                return ready(Ok(stored.data().clone()));
            }
            Some(_) => {
                metric!(counter("caches.store.expired") += 1, "cache" => self.name.as_ref());
            }
            None => {
                metric!(counter("caches.store.miss") += 1, "cache" => self.name.as_ref());
            }
        }

        let refresh = {
            let table = table.clone();
            let owned_key = key.to_owned();
            self.load_async(key, move || {
                let fetch = fetch();
                async move {
                    let value = fetch.await?;
                    table.put(&owned_key, &Expirable::new(value.clone()));
                    Ok(value)
                }
            })
        };

        match persisted {
            Some(stored) if serve_stale => {
                metric!(counter("caches.store.stale") += 1, "cache" => self.name.as_ref());
                ready(Ok(stored.into_data()))
            }
            _ => refresh,
        }
    }

    fn load_and_store<F, Fut>(&self, table: &Table<V>, key: &str, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let table = table.clone();
        let owned_key = key.to_owned();
        self.load_async(key, move || {
            let fetch = fetch();
            async move {
                let value = fetch.await?;
                table.put(&owned_key, &value);
                Ok(value)
            }
        })
    }
}
