//! Synchronous-style loading protocols.
//!
//! The loader runs inline on the calling task on a miss. Use [`InFlight`](super::InFlight)
//! for deduplicated loads on the worker pool instead.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tcmirror_sources::VersionedEntity;

use super::{CacheEntry, Expirable, Table};

/// Where a loaded value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served by the store.
    Store,
    /// Fetched from the remote server, and stored if `saved`.
    Remote { saved: bool },
    /// Fetched from the remote server to replace an outdated stored value, and stored if
    /// `saved`.
    Reloaded { saved: bool },
    /// The stored value is outdated, but the reload only produced a stub. The stored value is
    /// served unchanged and remains outdated.
    Outdated,
}

/// A loaded value and its [`Origin`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<V> {
    pub value: V,
    pub origin: Origin,
}

impl<V> Loaded<V> {
    /// Whether the value was just fetched and stored for the first time.
    ///
    /// Reloads of outdated values do not count, since the stored value was seen before.
    pub fn is_freshly_saved(&self) -> bool {
        self.origin == Origin::Remote { saved: true }
    }

    /// Whether the value was just fetched and stored, replacing an outdated value or not.
    pub fn is_saved(&self) -> bool {
        matches!(
            self.origin,
            Origin::Remote { saved: true } | Origin::Reloaded { saved: true }
        )
    }
}

/// Returns the stored value for `key`, or loads and stores it.
pub async fn load_if_absent<V, F, Fut>(table: &Table<V>, key: &str, load: F) -> CacheEntry<V>
where
    V: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CacheEntry<V>>,
{
    load_if_absent_filtered(table, key, load, |_| true).await
}

/// Returns the stored value for `key`, or loads it.
///
/// The loaded value is only stored if `save_filter` accepts it.
pub async fn load_if_absent_filtered<V, F, Fut, P>(
    table: &Table<V>,
    key: &str,
    load: F,
    save_filter: P,
) -> CacheEntry<V>
where
    V: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CacheEntry<V>>,
    P: FnOnce(&V) -> bool,
{
    let name = table.cache_name();
    metric!(counter("caches.access") += 1, "cache" => name.as_ref());

    if let Some(stored) = table.get(key) {
        metric!(counter("caches.store.hit") += 1, "cache" => name.as_ref());
        return Ok(stored);
    }
    metric!(counter("caches.store.miss") += 1, "cache" => name.as_ref());

    let loaded = load().await?;
    if save_filter(&loaded) {
        table.put(key, &loaded);
    }
    Ok(loaded)
}

/// Returns the stored value for `key` unless it is outdated, or loads it.
///
/// The loaded value is only stored if `save_filter` accepts it. When the stored value has real
/// content but the reload yields a [stub](VersionedEntity::is_fake_stub), the stored value is
/// returned as is, and is neither overwritten nor marked as current.
pub async fn load_versioned<V, F, Fut, P>(
    table: &Table<V>,
    key: &str,
    load: F,
    save_filter: P,
) -> CacheEntry<Loaded<V>>
where
    V: VersionedEntity + Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CacheEntry<V>>,
    P: FnOnce(&V) -> bool,
{
    let name = table.cache_name();
    metric!(counter("caches.access") += 1, "cache" => name.as_ref());

    let persisted = match table.get(key) {
        Some(stored) if !stored.is_outdated() => {
            metric!(counter("caches.store.hit") += 1, "cache" => name.as_ref());
            return Ok(Loaded {
                value: stored,
                origin: Origin::Store,
            });
        }
        Some(stored) => {
            metric!(counter("caches.store.outdated") += 1, "cache" => name.as_ref());
            Some(stored)
        }
        None => {
            metric!(counter("caches.store.miss") += 1, "cache" => name.as_ref());
            None
        }
    };

    let reloaded = persisted.is_some();
    let loaded = load().await?;
    if loaded.is_fake_stub() {
        if let Some(stored) = persisted.filter(|stored| !stored.is_fake_stub()) {
            tracing::warn!(
                table = %table.name(),
                key,
                version = stored.version(),
                "Reload of outdated value found nothing, keeping the stored one"
            );
            return Ok(Loaded {
                value: stored,
                origin: Origin::Outdated,
            });
        }
    }

    let saved = save_filter(&loaded);
    if saved {
        table.put(key, &loaded);
    }
    let origin = if reloaded {
        Origin::Reloaded { saved }
    } else {
        Origin::Remote { saved }
    };
    Ok(Loaded {
        value: loaded,
        origin,
    })
}

/// Returns the stored list for `key` while it is younger than `ttl_secs`, or refreshes it.
///
/// `merge` receives the stored list, if any, and produces the new list which is stored with a
/// fresh timestamp.
pub async fn load_or_merge<V, F, Fut>(
    table: &Table<Expirable<V>>,
    key: &str,
    ttl_secs: u64,
    merge: F,
) -> CacheEntry<V>
where
    V: Clone + Serialize + DeserializeOwned,
    F: FnOnce(Option<V>) -> Fut,
    Fut: Future<Output = CacheEntry<V>>,
{
    let name = table.cache_name();
    metric!(counter("caches.access") += 1, "cache" => name.as_ref());

    let persisted = table.get(key);
    if let Some(stored) = &persisted {
        if stored.is_age_less_than_secs(ttl_secs) {
            metric!(counter("caches.store.hit") += 1, "cache" => name.as_ref());
            return Ok(stored.data().clone());
        }
        metric!(counter("caches.store.expired") += 1, "cache" => name.as_ref());
    } else {
        metric!(counter("caches.store.miss") += 1, "cache" => name.as_ref());
    }

    let merged = merge(persisted.map(Expirable::into_data)).await?;
    table.put(key, &Expirable::new(merged.clone()));
    Ok(merged)
}
