//! Default values shared across the crate.

/// Logical cache name used when none is configured.
pub const DEFAULT_NAME: &str = "default";

/// Default server address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// Default connect timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 0.5;

/// Timeouts above this many seconds are flagged during validation.
pub const MAX_RECOMMENDED_TIMEOUT_SECS: f64 = 30.0;

/// Database namespace used when the machine host name cannot be determined.
pub const FALLBACK_DATABASE: &str = "localhost";

/// Prefix of every tag index record key.
///
/// Must not collide with keys written by callers.
pub const TAG_PREFIX: &str = "__memtag_tag__:";

/// Separator appended to the database name to build the key prefix.
pub const KEY_PREFIX_SEPARATOR: char = ':';

/// Default poll timeout in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 500;

/// Default send timeout in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;

/// Default receive timeout in milliseconds.
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 1_000;

/// Consecutive failures before the backend drops a server.
pub const DEFAULT_SERVER_FAILURE_LIMIT: u32 = 5;
