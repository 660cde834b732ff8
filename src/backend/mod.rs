//! Backend capability and the bundled in-process implementation.
//!
//! - [`StoreProvider`] / [`StoreSession`]: what the facade needs from a
//!   memcached-style client library.
//! - [`MemoryProvider`]: in-process store for embedding and tests.
//! - [`ProviderOptions`]: tuning knobs with a caller-wins defaults merge.
//!
//! # Custom Backends
//!
//! ```ignore
//! use memtag::backend::{StoreProvider, StoreSession};
//!
//! struct MemcachedProvider { /* ... */ }
//! impl StoreProvider for MemcachedProvider { /* ... */ }
//!
//! let cache = CacheFacade::connected(config, MemcachedProvider::new())?;
//! ```

mod memory;
mod options;
mod store;

pub use memory::{MemoryProvider, MemorySession};
pub use options::{OptionValue, ProviderOption, ProviderOptions, SerializerKind};
pub use store::{ExpireAt, StoreProvider, StoreResult, StoreSession};
