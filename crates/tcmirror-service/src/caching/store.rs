//! The partitioned key-value store all mirrored records live in.
//!
//! The [`KvStore`] trait is the byte-level capability, [`Table`] layers typed access with JSON
//! encoding on top of it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use rustc_hash::FxHasher;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheName;

/// Fully qualified name of a table: `<server id>.<cache name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(Arc<str>);

impl TableName {
    pub fn new(server_id: &str, cache: CacheName) -> Self {
        Self(format!("{server_id}.{cache}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte-level access to named, partitioned tables.
///
/// All operations touch a single key, and are isolated from other operations on the same key.
/// There are no multi-key transactions.
pub trait KvStore: Send + Sync + fmt::Debug + 'static {
    /// Makes sure the table exists. The partition count only applies to newly created tables.
    fn create_table(&self, table: &TableName, partitions: usize);

    fn get(&self, table: &TableName, key: &str) -> Option<Bytes>;

    fn put(&self, table: &TableName, key: &str, value: Bytes);

    /// Removes the entry, returning the previous value.
    fn remove(&self, table: &TableName, key: &str) -> Option<Bytes>;

    /// Atomically replaces the value under `key` with the output of `f`.
    ///
    /// `f` is called exactly once with the current value. Returning `None` leaves the entry
    /// unchanged.
    fn invoke(
        &self,
        table: &TableName,
        key: &str,
        f: &mut dyn FnMut(Option<&Bytes>) -> Option<Bytes>,
    );

    /// Returns all entries of the table.
    ///
    /// Partitions are copied one after the other, so concurrent writes to other keys may or may
    /// not be observed.
    fn scan(&self, table: &TableName) -> Vec<(String, Bytes)>;
}

type Partition = Mutex<BTreeMap<String, Bytes>>;

#[derive(Debug)]
struct MemoryTable {
    partitions: Box<[Partition]>,
}

impl MemoryTable {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Partition::default()).collect(),
        }
    }

    fn partition(&self, key: &str) -> &Partition {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let index = hasher.finish() as usize % self.partitions.len();
        &self.partitions[index]
    }
}

/// An in-process [`KvStore`].
///
/// Every table is split into partitions guarded by their own lock, which provides the per-key
/// isolation of [`KvStore::invoke`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableName, Arc<MemoryTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &TableName) -> Arc<MemoryTable> {
        if let Some(table) = self.tables.read().unwrap().get(name) {
            return Arc::clone(table);
        }
        self.open(name, CacheName::BuildRefs.partitions())
    }

    fn open(&self, name: &TableName, partitions: usize) -> Arc<MemoryTable> {
        let mut tables = self.tables.write().unwrap();
        let table = tables
            .entry(name.clone())
            .or_insert_with(|| Arc::new(MemoryTable::new(partitions)));
        Arc::clone(table)
    }
}

impl KvStore for MemoryStore {
    fn create_table(&self, table: &TableName, partitions: usize) {
        self.open(table, partitions);
    }

    fn get(&self, table: &TableName, key: &str) -> Option<Bytes> {
        let table = self.table(table);
        let partition = table.partition(key).lock().unwrap();
        partition.get(key).cloned()
    }

    fn put(&self, table: &TableName, key: &str, value: Bytes) {
        let table = self.table(table);
        let mut partition = table.partition(key).lock().unwrap();
        partition.insert(key.to_owned(), value);
    }

    fn remove(&self, table: &TableName, key: &str) -> Option<Bytes> {
        let table = self.table(table);
        let mut partition = table.partition(key).lock().unwrap();
        partition.remove(key)
    }

    fn invoke(
        &self,
        table: &TableName,
        key: &str,
        f: &mut dyn FnMut(Option<&Bytes>) -> Option<Bytes>,
    ) {
        let table = self.table(table);
        let mut partition = table.partition(key).lock().unwrap();
        if let Some(updated) = f(partition.get(key)) {
            partition.insert(key.to_owned(), updated);
        }
    }

    fn scan(&self, table: &TableName) -> Vec<(String, Bytes)> {
        let table = self.table(table);
        let mut entries = Vec::new();
        for partition in table.partitions.iter() {
            let partition = partition.lock().unwrap();
            entries.extend(partition.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries
    }
}

/// Typed access to one table of a [`KvStore`].
///
/// Values are stored as JSON. Values that fail to decode are logged and treated as absent, so
/// they get reloaded from the remote server.
pub struct Table<V> {
    cache: CacheName,
    name: TableName,
    store: Arc<dyn KvStore>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Table<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache,
            name: self.name.clone(),
            store: Arc::clone(&self.store),
            _value: PhantomData,
        }
    }
}

impl<V> fmt::Debug for Table<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}

impl<V: Serialize + DeserializeOwned> Table<V> {
    /// Opens the table for `cache` in the namespace of the given server.
    pub fn open(store: Arc<dyn KvStore>, server_id: &str, cache: CacheName) -> Self {
        let name = TableName::new(server_id, cache);
        store.create_table(&name, cache.partitions());
        Self {
            cache,
            name,
            store,
            _value: PhantomData,
        }
    }

    pub fn cache_name(&self) -> CacheName {
        self.cache
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let bytes = self.store.get(&self.name, key)?;
        self.decode(key, &bytes)
    }

    pub fn put(&self, key: &str, value: &V) {
        if let Some(bytes) = self.encode(key, value) {
            self.store.put(&self.name, key, bytes);
        }
    }

    /// Removes the entry, returning whether there was one.
    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(&self.name, key).is_some()
    }

    /// Atomically updates the value under `key`.
    ///
    /// `f` receives the current value, if any. Returning `None` leaves the entry unchanged.
    /// Returns the newly stored value.
    pub fn update<F>(&self, key: &str, f: F) -> Option<V>
    where
        F: FnOnce(Option<V>) -> Option<V>,
    {
        let mut f = Some(f);
        let mut stored = None;
        self.store.invoke(&self.name, key, &mut |current| {
            let f = f.take()?;
            let current = current.and_then(|bytes| self.decode(key, bytes));
            let updated = f(current)?;
            let bytes = self.encode(key, &updated)?;
            stored = Some(updated);
            Some(bytes)
        });
        stored
    }

    /// All decodable entries of the table, in no particular order.
    pub fn scan(&self) -> impl Iterator<Item = (String, V)> + '_ {
        self.store
            .scan(&self.name)
            .into_iter()
            .filter_map(|(key, bytes)| {
                let value = self.decode(&key, &bytes)?;
                Some((key, value))
            })
    }

    /// All decodable values of the table, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.scan().map(|(_, value)| value)
    }

    /// Removes all entries, returning how many there were.
    pub fn clear(&self) -> usize {
        self.store
            .scan(&self.name)
            .into_iter()
            .filter(|(key, _)| self.remove(key))
            .count()
    }

    fn decode(&self, key: &str, bytes: &Bytes) -> Option<V> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    table = %self.name,
                    key,
                    "Failed to decode stored value"
                );
                None
            }
        }
    }

    fn encode(&self, key: &str, value: &V) -> Option<Bytes> {
        match serde_json::to_vec(value) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    table = %self.name,
                    key,
                    "Failed to encode value"
                );
                None
            }
        }
    }
}
