//! The public cache facade.
//!
//! [`CacheFacade`] composes the connection session, the degraded-mode guard
//! and the tag index behind a small synchronous API. No backend fault ever
//! escapes it: writes report `false`/`0`, reads report "no value" or fall
//! back to a caller supplied recovery function.
//!
//! # Example
//!
//! ```ignore
//! use memtag::{CacheConfig, CacheFacade, MemoryProvider};
//! use std::time::Duration;
//!
//! let cache = CacheFacade::connected(CacheConfig::default(), MemoryProvider::new())?;
//!
//! cache.save("user:1", b"alice".to_vec(), Some(Duration::from_secs(60)), ["users"]);
//! let user = cache.load_or_else("user:2", |cache, key| {
//!     let value = load_user_from_db(key)?;
//!     cache.save(key, value.clone(), None, ["users"]);
//!     Ok(Some(value))
//! });
//!
//! // drop every entry tagged "users", plus the tag record itself
//! cache.delete_by_tags("users");
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{ExpireAt, StoreProvider, StoreSession};
use crate::config::CacheConfig;
use crate::error::{Error, Operation, Result};
use crate::guard::{FaultReporter, Guard, TracingReporter};
use crate::session::ConnectionSession;
use crate::tags::TagIndex;

/// A key or tag list argument: one value or many.
///
/// Lets call sites pass `"users"`, `["users", "admins"]` or a `Vec<String>`
/// where a list is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keys {
    One(String),
    Many(Vec<String>),
}

impl Keys {
    /// An empty list.
    pub fn none() -> Self {
        Self::Many(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(_) => false,
            Self::Many(keys) => keys.is_empty(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        }
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&str> for Keys {
    fn from(key: &str) -> Self {
        Self::One(key.to_string())
    }
}

impl From<String> for Keys {
    fn from(key: String) -> Self {
        Self::One(key)
    }
}

impl From<Vec<String>> for Keys {
    fn from(keys: Vec<String>) -> Self {
        Self::Many(keys)
    }
}

impl From<Vec<&str>> for Keys {
    fn from(keys: Vec<&str>) -> Self {
        Self::Many(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Keys {
    fn from(keys: &[&str]) -> Self {
        Self::Many(keys.iter().map(|k| (*k).to_string()).collect())
    }
}

impl From<&[String]> for Keys {
    fn from(keys: &[String]) -> Self {
        Self::Many(keys.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Keys {
    fn from(keys: [&str; N]) -> Self {
        Self::Many(keys.iter().map(|k| (*k).to_string()).collect())
    }
}

/// Recovery function signature used internally by the read paths.
type Recover<'f> = &'f dyn Fn(&CacheFacade, &str) -> anyhow::Result<Option<Vec<u8>>>;

fn expire_at(ttl: Option<Duration>) -> ExpireAt {
    let ttl = TimeDelta::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(ttl)
}

/// Cache facade over a memcached-style store with tag invalidation.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct CacheFacade {
    session: ConnectionSession,
    guard: Guard,
}

impl CacheFacade {
    /// Build a facade without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationShapeMismatch`] if the host/port
    /// configuration cannot be resolved.
    pub fn new<P: StoreProvider>(config: CacheConfig, provider: P) -> Result<Self> {
        let session = ConnectionSession::new(config, Arc::new(provider))?;
        let guard = Guard::new(Arc::clone(session.state()), Arc::new(TracingReporter));
        Ok(Self { session, guard })
    }

    /// Build a facade and connect it.
    ///
    /// A failed connection is not an error: the facade comes back disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationShapeMismatch`] if the host/port
    /// configuration cannot be resolved.
    pub fn connected<P: StoreProvider>(config: CacheConfig, provider: P) -> Result<Self> {
        let cache = Self::new(config, provider)?;
        cache.connect();
        Ok(cache)
    }

    /// Replace the fault reporter (defaults to [`TracingReporter`]).
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FaultReporter + 'static) -> Self {
        self.guard = Guard::new(Arc::clone(self.session.state()), Arc::new(reporter));
        self
    }

    /// Connect, or re-probe a connection disabled by a fault.
    pub fn connect(&self) -> bool {
        self.session.connect(self.guard.reporter().as_ref())
    }

    pub fn config(&self) -> &CacheConfig {
        self.session.config()
    }

    pub fn is_installed(&self) -> bool {
        self.session.state().is_installed()
    }

    pub fn is_connected(&self) -> bool {
        self.session.state().is_connected()
    }

    pub fn is_enabled(&self) -> bool {
        self.session.state().is_enabled()
    }

    /// Enable or disable the cache by hand.
    ///
    /// Enabling only takes effect while connected. Returns the resulting
    /// state.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.session.state().set_enabled(enabled)
    }

    /// The live backend session, for provider specific calls.
    pub fn session(&self) -> Option<Arc<dyn StoreSession>> {
        self.session.handle()
    }

    /// Session to use for an operation, `None` while disabled.
    fn active(&self) -> Option<Arc<dyn StoreSession>> {
        if self.is_enabled() {
            self.session.handle()
        } else {
            None
        }
    }

    /// Store one entry, then tag it.
    ///
    /// `ttl` of `None` keeps the entry until evicted. Only the entry write
    /// decides the result; tag maintenance failures are reported but do not
    /// turn a stored entry into `false`.
    pub fn save(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        ttl: Option<Duration>,
        tags: impl Into<Keys>,
    ) -> bool {
        let Some(session) = self.active() else {
            return false;
        };

        let stored = self.guard.call(Operation::Set, false, || {
            session.set(key, value.into(), expire_at(ttl)).map(|()| true)
        });
        if stored {
            let tags = tags.into().into_vec();
            TagIndex::new(session.as_ref(), &self.guard).attach(&[key.to_string()], &tags);
        }
        stored
    }

    /// Store many entries in one batch, then tag all of them.
    ///
    /// An empty `entries` map stores nothing and returns `false`, so `true`
    /// always means at least one entry was written.
    pub fn save_multiple(
        &self,
        entries: HashMap<String, Vec<u8>>,
        ttl: Option<Duration>,
        tags: impl Into<Keys>,
    ) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        if entries.is_empty() {
            return false;
        }

        let keys: Vec<String> = entries.keys().cloned().collect();
        let stored = self.guard.call(Operation::MultiSet, false, || {
            session.multi_set(entries, expire_at(ttl)).map(|()| true)
        });
        if stored {
            let tags = tags.into().into_vec();
            TagIndex::new(session.as_ref(), &self.guard).attach(&keys, &tags);
        }
        stored
    }

    /// Fetch one entry.
    pub fn load(&self, key: &str) -> Option<Vec<u8>> {
        self.load_with(key, None)
    }

    /// Fetch one entry, asking `not_found` on a miss or while disabled.
    ///
    /// What `not_found` returns is not stored; call [`CacheFacade::save`]
    /// from inside it to populate the cache. Its errors are reported and
    /// read as `None`.
    pub fn load_or_else<F>(&self, key: &str, not_found: F) -> Option<Vec<u8>>
    where
        F: Fn(&CacheFacade, &str) -> anyhow::Result<Option<Vec<u8>>>,
    {
        self.load_with(key, Some(&not_found))
    }

    fn load_with(&self, key: &str, not_found: Option<Recover<'_>>) -> Option<Vec<u8>> {
        let Some(session) = self.active() else {
            return self.recover(key, not_found);
        };

        // outer None: the get itself failed, no recovery on a fault
        let hit = self
            .guard
            .call(Operation::Get, None, || session.get(key).map(Some))?;
        match hit {
            Some(value) => Some(value),
            None => {
                debug!(key, "cache miss");
                self.recover(key, not_found)
            },
        }
    }

    fn recover(&self, key: &str, not_found: Option<Recover<'_>>) -> Option<Vec<u8>> {
        let not_found = not_found?;
        self.guard.recover(key, || not_found(self, key))
    }

    /// Fetch many entries in one batch.
    ///
    /// Returns `None` while the cache is disabled, which is different from an
    /// empty map (enabled, nothing found).
    pub fn load_multiple(&self, keys: impl Into<Keys>) -> Option<HashMap<String, Vec<u8>>> {
        self.load_multiple_with(keys.into().into_vec(), None)
    }

    /// Fetch many entries, asking `not_found` for every key the batch
    /// missed.
    ///
    /// Keys for which neither the store nor `not_found` has a value are
    /// absent from the result.
    pub fn load_multiple_or_else<F>(
        &self,
        keys: impl Into<Keys>,
        not_found: F,
    ) -> Option<HashMap<String, Vec<u8>>>
    where
        F: Fn(&CacheFacade, &str) -> anyhow::Result<Option<Vec<u8>>>,
    {
        self.load_multiple_with(keys.into().into_vec(), Some(&not_found))
    }

    fn load_multiple_with(
        &self,
        keys: Vec<String>,
        not_found: Option<Recover<'_>>,
    ) -> Option<HashMap<String, Vec<u8>>> {
        let mut found = match self.active() {
            Some(session) => self.guard.call(Operation::MultiGet, HashMap::new(), || {
                session.multi_get(&keys)
            }),
            None if not_found.is_none() => return None,
            None => HashMap::new(),
        };

        if not_found.is_some() {
            for key in &keys {
                if found.contains_key(key) {
                    continue;
                }
                if let Some(value) = self.recover(key, not_found) {
                    found.insert(key.clone(), value);
                }
            }
        }
        Some(found)
    }

    /// Delete one entry. True if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        self.guard
            .call(Operation::Delete, false, || session.delete(key))
    }

    /// Delete `keys` in one batch and remove them from the tags listed in
    /// `key_tags`.
    ///
    /// The two steps run independently; a failure in one does not stop the
    /// other. Returns the number of entries the batch delete removed.
    pub fn delete_multiple(
        &self,
        keys: impl Into<Keys>,
        key_tags: &HashMap<String, Vec<String>>,
    ) -> usize {
        let Some(session) = self.active() else {
            return 0;
        };

        let keys = keys.into().into_vec();
        let deleted = if keys.is_empty() {
            0
        } else {
            self.guard
                .call(Operation::MultiDelete, 0, || session.multi_delete(&keys))
        };
        if !key_tags.is_empty() {
            TagIndex::new(session.as_ref(), &self.guard).detach(key_tags);
        }
        deleted
    }

    /// Delete every entry carrying any of `tags`, plus the tag records.
    ///
    /// One batch delete covers both. The returned count is what the store
    /// reports removed, tag records included: two entries under one tag
    /// count as 3.
    pub fn delete_by_tags(&self, tags: impl Into<Keys>) -> usize {
        let Some(session) = self.active() else {
            return 0;
        };

        let tags = tags.into().into_vec();
        if tags.is_empty() {
            return 0;
        }
        let doomed = TagIndex::new(session.as_ref(), &self.guard).resolve_for_deletion(&tags);
        if doomed.is_empty() {
            return 0;
        }
        debug!(tags = tags.len(), keys = doomed.len(), "deleting by tags");
        self.guard
            .call(Operation::MultiDelete, 0, || session.multi_delete(&doomed))
    }

    /// Whether `key` is cached.
    pub fn has(&self, key: &str) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        self.guard
            .call(Operation::Get, false, || session.exists(key))
    }

    /// How many of `keys` are cached.
    pub fn has_multiple(&self, keys: impl Into<Keys>) -> usize {
        let Some(session) = self.active() else {
            return 0;
        };
        let keys = keys.into().into_vec();
        if keys.is_empty() {
            return 0;
        }
        self.guard.call(Operation::MultiGet, 0, || {
            session.multi_get(&keys).map(|found| found.len())
        })
    }

    /// Invalidate the whole store, tag records included.
    pub fn clear(&self) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        self.guard.call(Operation::Flush, false, || session.flush())
    }

    /// Serialize `value` as JSON and [`save`](Self::save) it.
    ///
    /// An encoding failure is reported and returns false.
    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: impl Into<Keys>,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => self.save(key, bytes, ttl, tags),
            Err(source) => {
                self.guard.report(&Error::Serialization {
                    key: key.to_string(),
                    source,
                });
                false
            },
        }
    }

    /// [`load`](Self::load) an entry and decode it from JSON.
    ///
    /// An entry that does not decode as `T` is reported and read as a miss.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.load(key)?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(source) => {
                self.guard.report(&Error::Serialization {
                    key: key.to_string(),
                    source,
                });
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryProvider;
    use crate::tags::record_key;
    use serde::Deserialize;

    fn cache() -> (MemoryProvider, CacheFacade) {
        let provider = MemoryProvider::new();
        let cache = CacheFacade::connected(
            CacheConfig::default().with_database("test"),
            provider.clone(),
        )
        .unwrap();
        (provider, cache)
    }

    #[test]
    fn test_keys_conversions() {
        assert_eq!(Keys::from("a").into_vec(), vec!["a"]);
        assert_eq!(Keys::from(["a", "b"]).into_vec(), vec!["a", "b"]);
        assert_eq!(Keys::from(vec!["a".to_string()]).into_vec(), vec!["a"]);
        assert!(Keys::none().is_empty());
        assert!(!Keys::from("").is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let (_, cache) = cache();
        assert!(cache.save("k", b"v".to_vec(), None, Keys::none()));
        assert_eq!(cache.load("k"), Some(b"v".to_vec()));
        assert!(cache.has("k"));
        assert!(cache.load("missing").is_none());
    }

    #[test]
    fn test_keys_are_prefixed_with_database() {
        let (provider, cache) = cache();
        cache.save("k", b"v".to_vec(), None, "t");
        assert!(provider.contains_raw("test:k"));
        assert!(provider.contains_raw(&format!("test:{}", record_key("t"))));
    }

    #[test]
    fn test_ttl_sets_expiration() {
        let (_, cache) = cache();
        cache.save("short", b"v".to_vec(), Some(Duration::ZERO), Keys::none());
        assert!(cache.load("short").is_none());

        cache.save("long", b"v".to_vec(), Some(Duration::from_secs(3600)), Keys::none());
        assert!(cache.has("long"));
    }

    #[test]
    fn test_load_or_else_runs_on_miss_only() {
        let (_, cache) = cache();
        cache.save("hit", b"cached".to_vec(), None, Keys::none());

        let value = cache.load_or_else("hit", |_, _| Ok(Some(b"origin".to_vec())));
        assert_eq!(value, Some(b"cached".to_vec()));

        let value = cache.load_or_else("miss", |_, key| Ok(Some(key.as_bytes().to_vec())));
        assert_eq!(value, Some(b"miss".to_vec()));
        // not persisted automatically
        assert!(!cache.has("miss"));
    }

    #[test]
    fn test_recovery_can_populate_cache() {
        let (_, cache) = cache();
        let value = cache.load_or_else("user:1", |cache, key| {
            let value = b"alice".to_vec();
            cache.save(key, value.clone(), None, "users");
            Ok(Some(value))
        });
        assert_eq!(value, Some(b"alice".to_vec()));
        assert_eq!(cache.load("user:1"), Some(b"alice".to_vec()));
    }

    #[test]
    fn test_load_multiple() {
        let (_, cache) = cache();
        cache.save("a", b"1".to_vec(), None, Keys::none());
        cache.save("b", b"2".to_vec(), None, Keys::none());

        let found = cache.load_multiple(["a", "b", "c"]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], b"1".to_vec());

        let found = cache
            .load_multiple_or_else(["a", "c", "d"], |_, key| {
                Ok((key == "c").then(|| b"3".to_vec()))
            })
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["c"], b"3".to_vec());
        assert!(!found.contains_key("d"));
    }

    #[test]
    fn test_delete_by_tags_counts_tag_record() {
        let (provider, cache) = cache();
        cache.save("k1", b"1".to_vec(), None, "t");
        cache.save("k2", b"2".to_vec(), None, "t");
        cache.save("other", b"3".to_vec(), None, Keys::none());

        // k1, k2 and the record for "t"
        assert_eq!(cache.delete_by_tags("t"), 3);
        assert!(!cache.has("k1"));
        assert!(!cache.has("k2"));
        assert!(cache.has("other"));
        assert!(!provider.contains_raw(&format!("test:{}", record_key("t"))));
    }

    #[test]
    fn test_delete_multiple_prunes_tags() {
        let (provider, cache) = cache();
        cache.save("a", b"1".to_vec(), None, ["t", "u"]);
        cache.save("b", b"2".to_vec(), None, "u");

        let key_tags = HashMap::from([("a".to_string(), vec!["t".to_string(), "u".to_string()])]);
        assert_eq!(cache.delete_multiple("a", &key_tags), 1);

        assert!(!provider.contains_raw(&format!("test:{}", record_key("t"))));
        // "u" still holds b, deleting it removes b and the record
        assert_eq!(cache.delete_by_tags("u"), 2);
    }

    #[test]
    fn test_has_multiple_and_clear() {
        let (provider, cache) = cache();
        let entries = HashMap::from([
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ]);
        assert!(cache.save_multiple(entries, None, "batch"));
        assert_eq!(cache.has_multiple(["a", "b", "c"]), 2);
        assert_eq!(cache.delete_by_tags("batch"), 3);

        cache.save("x", b"1".to_vec(), None, "t");
        assert!(cache.clear());
        assert!(provider.is_empty());
    }

    #[test]
    fn test_save_multiple_empty_is_false() {
        let (_, cache) = cache();
        assert!(!cache.save_multiple(HashMap::new(), None, Keys::none()));
    }

    #[test]
    fn test_json_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct User {
            id: u32,
            name: String,
        }

        let (_, cache) = cache();
        let user = User {
            id: 7,
            name: "ada".into(),
        };
        assert!(cache.save_json("user:7", &user, None, "users"));
        assert_eq!(cache.load_json::<User>("user:7"), Some(user));

        cache.save("broken", b"{".to_vec(), None, Keys::none());
        assert_eq!(cache.load_json::<User>("broken"), None);
        // a decode failure is caller data, not a backend fault
        assert!(cache.is_enabled());
    }

    #[test]
    fn test_set_enabled_requires_connection() {
        let cache = CacheFacade::new(CacheConfig::default(), MemoryProvider::new()).unwrap();
        assert!(!cache.set_enabled(true));
        assert!(cache.connect());
        assert!(!cache.set_enabled(false));
        assert!(!cache.save("k", b"v".to_vec(), None, Keys::none()));
        assert!(cache.set_enabled(true));
        assert!(cache.save("k", b"v".to_vec(), None, Keys::none()));
    }
}
