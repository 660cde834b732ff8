//! In-process store backend.
//!
//! Behaves like a small memcached cluster held in a `DashMap`: sessions
//! register servers, apply a key prefix, expire entries lazily and can be
//! shared by persistence id. Ideal for embedding, development and tests.
//!
//! Reachability can be switched off to exercise degraded mode: every data
//! call then fails with [`StoreError::Unreachable`] and the version probe
//! answers `None`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::options::{OptionValue, ProviderOption};
use super::store::{ExpireAt, StoreProvider, StoreResult, StoreSession};
use crate::error::StoreError;
use crate::topology::ServerDescriptor;

const VERSION: &str = concat!("memtag-memory/", env!("CARGO_PKG_VERSION"));

/// Entry stored in the memory backend with optional expiration.
#[derive(Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn new(value: Vec<u8>, expires_at: ExpireAt) -> Self {
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }
}

/// Storage and switches shared by every session of one provider.
#[derive(Default)]
struct Cluster {
    data: DashMap<String, MemoryEntry>,
    unreachable: AtomicBool,
}

/// Provider handing out [`MemorySession`]s over one shared store.
///
/// # Example
///
/// ```ignore
/// use memtag::{CacheConfig, CacheFacade, MemoryProvider};
///
/// let provider = MemoryProvider::new();
/// let cache = CacheFacade::connected(CacheConfig::default(), provider)?;
/// cache.save("key", b"value".to_vec(), None, "tag");
/// ```
#[derive(Clone)]
pub struct MemoryProvider {
    cluster: Arc<Cluster>,
    persistent: Arc<DashMap<String, Arc<MemorySession>>>,
    installed: bool,
    binary_serializer: bool,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Creates a provider with an empty store.
    pub fn new() -> Self {
        Self {
            cluster: Arc::new(Cluster::default()),
            persistent: Arc::new(DashMap::new()),
            installed: true,
            binary_serializer: true,
        }
    }

    /// A provider reporting that no client library is installed.
    pub fn not_installed() -> Self {
        Self {
            installed: false,
            ..Self::new()
        }
    }

    /// Whether sessions advertise a binary serializer.
    #[must_use]
    pub fn with_binary_serializer(mut self, supported: bool) -> Self {
        self.binary_serializer = supported;
        self
    }

    /// Make every server reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.cluster.unreachable.store(!reachable, Ordering::Release);
    }

    /// Number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.cluster.data.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.cluster.data.is_empty()
    }

    /// Whether an entry exists under its full, prefixed key.
    pub fn contains_raw(&self, raw_key: &str) -> bool {
        self.cluster
            .data
            .get(raw_key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Removes all expired entries from the store.
    pub fn cleanup_expired(&self) {
        self.cluster.data.retain(|_, entry| !entry.is_expired());
    }
}

impl StoreProvider for MemoryProvider {
    fn is_installed(&self) -> bool {
        self.installed
    }

    fn open_session(&self, persistence_id: Option<&str>) -> StoreResult<Arc<dyn StoreSession>> {
        let Some(id) = persistence_id else {
            return Ok(Arc::new(MemorySession::new(
                Arc::clone(&self.cluster),
                false,
                self.binary_serializer,
            )));
        };

        let session = self
            .persistent
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(MemorySession::new(
                    Arc::clone(&self.cluster),
                    true,
                    self.binary_serializer,
                ))
            })
            .clone();
        Ok(session)
    }
}

/// Session onto a [`MemoryProvider`] store.
pub struct MemorySession {
    cluster: Arc<Cluster>,
    servers: RwLock<Vec<ServerDescriptor>>,
    options: RwLock<BTreeMap<ProviderOption, OptionValue>>,
    persistent: bool,
    binary_serializer: bool,
}

impl MemorySession {
    fn new(cluster: Arc<Cluster>, persistent: bool, binary_serializer: bool) -> Self {
        Self {
            cluster,
            servers: RwLock::new(Vec::new()),
            options: RwLock::new(BTreeMap::new()),
            persistent,
            binary_serializer,
        }
    }

    fn full_key(&self, key: &str) -> String {
        match self
            .options
            .read()
            .get(&ProviderOption::PrefixKey)
            .and_then(OptionValue::as_text)
        {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    /// Fails unless at least one server is registered and reachable.
    fn ensure_reachable(&self) -> StoreResult<()> {
        let servers = self.servers.read();
        match servers.first() {
            None => Err(StoreError::unreachable("no servers registered")),
            Some(first) if self.cluster.unreachable.load(Ordering::Acquire) => {
                Err(StoreError::unreachable(first.address()))
            },
            Some(_) => Ok(()),
        }
    }

    fn read(&self, full_key: &str) -> Option<Vec<u8>> {
        let entry = self.cluster.data.get(full_key)?;
        if entry.is_expired() {
            drop(entry);
            self.cluster.data.remove(full_key);
            None
        } else {
            Some(entry.value.clone())
        }
    }

    fn remove(&self, full_key: &str) -> bool {
        match self.cluster.data.remove(full_key) {
            Some((_, entry)) => !entry.is_expired(),
            None => false,
        }
    }
}

impl StoreSession for MemorySession {
    fn add_server(&self, server: &ServerDescriptor) -> StoreResult<()> {
        if server.host.is_empty() {
            return Err(StoreError::Rejected("server host cannot be empty".into()));
        }
        self.servers.write().push(server.clone());
        Ok(())
    }

    fn server_list(&self) -> Vec<ServerDescriptor> {
        self.servers.read().clone()
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn set_option(&self, option: ProviderOption, value: OptionValue) -> StoreResult<()> {
        self.options.write().insert(option, value);
        Ok(())
    }

    fn get_option(&self, option: ProviderOption) -> Option<OptionValue> {
        self.options.read().get(&option).cloned()
    }

    fn supports_binary_serializer(&self) -> bool {
        self.binary_serializer
    }

    fn version(&self) -> Option<String> {
        self.ensure_reachable().ok().map(|()| VERSION.to_string())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_reachable()?;
        Ok(self.read(&self.full_key(key)))
    }

    fn multi_get(&self, keys: &[String]) -> StoreResult<HashMap<String, Vec<u8>>> {
        self.ensure_reachable()?;
        Ok(keys
            .iter()
            .filter_map(|key| self.read(&self.full_key(key)).map(|v| (key.clone(), v)))
            .collect())
    }

    fn set(&self, key: &str, value: Vec<u8>, expire_at: ExpireAt) -> StoreResult<()> {
        self.ensure_reachable()?;
        self.cluster
            .data
            .insert(self.full_key(key), MemoryEntry::new(value, expire_at));
        Ok(())
    }

    fn multi_set(&self, entries: HashMap<String, Vec<u8>>, expire_at: ExpireAt) -> StoreResult<()> {
        self.ensure_reachable()?;
        for (key, value) in entries {
            self.cluster
                .data
                .insert(self.full_key(&key), MemoryEntry::new(value, expire_at));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.ensure_reachable()?;
        Ok(self.remove(&self.full_key(key)))
    }

    fn multi_delete(&self, keys: &[String]) -> StoreResult<usize> {
        self.ensure_reachable()?;
        Ok(keys
            .iter()
            .filter(|key| self.remove(&self.full_key(key)))
            .count())
    }

    fn flush(&self) -> StoreResult<bool> {
        self.ensure_reachable()?;
        self.cluster.data.clear();
        Ok(true)
    }
}
