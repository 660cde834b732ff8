//! Backend capability traits.
//!
//! The facade never talks a wire protocol itself. It drives a
//! [`StoreProvider`] (the installed client library) which hands out
//! [`StoreSession`]s (a configured handle onto a set of servers).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::options::{OptionValue, ProviderOption};
use crate::error::StoreError;
use crate::topology::ServerDescriptor;

/// Result of a single backend call.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Absolute expiration of an entry. `None` keeps the entry until evicted.
pub type ExpireAt = Option<DateTime<Utc>>;

/// Client library able to open sessions to a distributed store.
pub trait StoreProvider: Send + Sync + 'static {
    /// Whether the client library is available at all.
    ///
    /// Checked once when a facade is built.
    fn is_installed(&self) -> bool;

    /// Acquire a session.
    ///
    /// With a `persistence_id`, providers that support it return the same
    /// session to every caller using that id, already configured servers
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be created.
    fn open_session(&self, persistence_id: Option<&str>) -> StoreResult<Arc<dyn StoreSession>>;
}

/// A handle onto the store.
///
/// All keys passed in are caller keys; applying the configured
/// [`ProviderOption::PrefixKey`] is the session's job.
///
/// Multi-key calls are best effort per key: a batch may partially succeed
/// and that is reported through counts, not errors.
pub trait StoreSession: Send + Sync {
    /// Register a server with the session.
    fn add_server(&self, server: &ServerDescriptor) -> StoreResult<()>;

    /// Servers currently registered.
    fn server_list(&self) -> Vec<ServerDescriptor>;

    /// Whether this session outlives the facade that opened it.
    fn is_persistent(&self) -> bool;

    fn set_option(&self, option: ProviderOption, value: OptionValue) -> StoreResult<()>;

    fn get_option(&self, option: ProviderOption) -> Option<OptionValue>;

    /// Whether a binary serializer is available.
    fn supports_binary_serializer(&self) -> bool {
        false
    }

    /// Identity/version string of the backend, or `None` if no server
    /// answered. Used as the liveness probe; it never errors.
    fn version(&self) -> Option<String>;

    /// Fetch one entry. `Ok(None)` is a definite miss.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Fetch many entries. Missing keys are simply absent from the map.
    fn multi_get(&self, keys: &[String]) -> StoreResult<HashMap<String, Vec<u8>>>;

    fn set(&self, key: &str, value: Vec<u8>, expire_at: ExpireAt) -> StoreResult<()>;

    fn multi_set(&self, entries: HashMap<String, Vec<u8>>, expire_at: ExpireAt) -> StoreResult<()>;

    /// Delete one entry. `Ok(false)` if it did not exist.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete many entries, returning how many existed.
    fn multi_delete(&self, keys: &[String]) -> StoreResult<usize>;

    /// Invalidate every entry on every server.
    fn flush(&self) -> StoreResult<bool>;

    /// Whether an entry exists.
    ///
    /// Default implementation uses `get()`.
    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
