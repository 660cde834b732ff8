//! Memcached-style cache facade with weighted server topology, degraded
//! mode and tag based invalidation.
//!
//! - [`CacheFacade`]: save/load/delete, multi-key and tag scoped variants.
//! - [`CacheConfig`]: connection settings, loadable from TOML.
//! - [`backend`]: the store capability traits and an in-process store.
//! - [`topology`]: host/port/weight resolution.
//!
//! ```ignore
//! use memtag::{CacheConfig, CacheFacade, MemoryProvider};
//!
//! let config = CacheConfig::load_from("cache.toml")?;
//! let cache = CacheFacade::connected(config, MemoryProvider::new())?;
//!
//! cache.save("product:1", b"{\"name\":\"lamp\"}".to_vec(), None, ["products", "home"]);
//! cache.delete_by_tags("products");
//! ```

pub mod backend;
pub mod config;
pub mod constants;
mod error;
mod facade;
pub mod guard;
pub mod logging;
pub mod session;
pub mod tags;
pub mod topology;

// Public API exports
pub use backend::{MemoryProvider, ProviderOption, ProviderOptions, StoreProvider, StoreSession};
pub use config::{CacheConfig, ValidationResult};
pub use error::{Error, Operation, Result, StoreError};
pub use facade::{CacheFacade, Keys};
pub use guard::{FaultReporter, TracingReporter};
pub use topology::{HostSpec, PortSpec, ServerDescriptor, WeightedHost};
