//! Shared test helpers: a fault-injecting provider and a recording reporter.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use memtag::backend::{ExpireAt, OptionValue, StoreResult};
use memtag::{
    CacheConfig, CacheFacade, Error, MemoryProvider, Operation, ProviderOption, ServerDescriptor,
    StoreError, StoreProvider, StoreSession,
};
use parking_lot::Mutex;

/// Switches and counters shared by a [`FlakyProvider`] and its sessions.
#[derive(Default)]
pub struct Faults {
    failing: Mutex<HashSet<Operation>>,
    data_calls: AtomicUsize,
    per_op: Mutex<HashMap<Operation, usize>>,
}

impl Faults {
    pub fn fail(&self, op: Operation) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    /// Data calls (get/set/delete/flush and their batch forms) made so far.
    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }

    /// Calls of one kind made so far.
    pub fn calls(&self, op: Operation) -> usize {
        self.per_op.lock().get(&op).copied().unwrap_or(0)
    }

    /// Forget every count.
    pub fn reset_counts(&self) {
        self.data_calls.store(0, Ordering::SeqCst);
        self.per_op.lock().clear();
    }

    fn check(&self, op: Operation) -> StoreResult<()> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        *self.per_op.lock().entry(op).or_default() += 1;
        if self.failing.lock().contains(&op) {
            Err(StoreError::Rejected(format!("injected {op} fault")))
        } else {
            Ok(())
        }
    }
}

/// Wraps a [`MemoryProvider`], counting data calls and failing chosen ones.
#[derive(Clone)]
pub struct FlakyProvider {
    pub inner: MemoryProvider,
    pub faults: Arc<Faults>,
}

impl FlakyProvider {
    pub fn new() -> Self {
        Self {
            inner: MemoryProvider::new(),
            faults: Arc::new(Faults::default()),
        }
    }
}

impl StoreProvider for FlakyProvider {
    fn is_installed(&self) -> bool {
        self.inner.is_installed()
    }

    fn open_session(&self, persistence_id: Option<&str>) -> StoreResult<Arc<dyn StoreSession>> {
        let inner = self.inner.open_session(persistence_id)?;
        Ok(Arc::new(FlakySession {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FlakySession {
    inner: Arc<dyn StoreSession>,
    faults: Arc<Faults>,
}

impl StoreSession for FlakySession {
    fn add_server(&self, server: &ServerDescriptor) -> StoreResult<()> {
        self.inner.add_server(server)
    }

    fn server_list(&self) -> Vec<ServerDescriptor> {
        self.inner.server_list()
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }

    fn set_option(&self, option: ProviderOption, value: OptionValue) -> StoreResult<()> {
        self.inner.set_option(option, value)
    }

    fn get_option(&self, option: ProviderOption) -> Option<OptionValue> {
        self.inner.get_option(option)
    }

    fn version(&self) -> Option<String> {
        self.inner.version()
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.faults.check(Operation::Get)?;
        self.inner.get(key)
    }

    fn multi_get(&self, keys: &[String]) -> StoreResult<HashMap<String, Vec<u8>>> {
        self.faults.check(Operation::MultiGet)?;
        self.inner.multi_get(keys)
    }

    fn set(&self, key: &str, value: Vec<u8>, expire_at: ExpireAt) -> StoreResult<()> {
        self.faults.check(Operation::Set)?;
        self.inner.set(key, value, expire_at)
    }

    fn multi_set(&self, entries: HashMap<String, Vec<u8>>, expire_at: ExpireAt) -> StoreResult<()> {
        self.faults.check(Operation::MultiSet)?;
        self.inner.multi_set(entries, expire_at)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.faults.check(Operation::Delete)?;
        self.inner.delete(key)
    }

    fn multi_delete(&self, keys: &[String]) -> StoreResult<usize> {
        self.faults.check(Operation::MultiDelete)?;
        self.inner.multi_delete(keys)
    }

    fn flush(&self) -> StoreResult<bool> {
        self.faults.check(Operation::Flush)?;
        self.inner.flush()
    }
}

/// Collects every reported fault as its display string.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn reporter(&self) -> impl Fn(&Error) + Send + Sync + 'static {
        let sink = Arc::clone(&self.0);
        move |err: &Error| sink.lock().push(err.to_string())
    }

    pub fn faults(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub fn config() -> CacheConfig {
    CacheConfig::default().with_database("it")
}

/// A connected facade over a [`FlakyProvider`] with a recording reporter.
pub fn flaky_cache() -> (FlakyProvider, Recorder, CacheFacade) {
    let provider = FlakyProvider::new();
    let recorder = Recorder::default();
    let cache = CacheFacade::new(config(), provider.clone())
        .unwrap()
        .with_reporter(recorder.reporter());
    assert!(cache.connect());
    (provider, recorder, cache)
}
