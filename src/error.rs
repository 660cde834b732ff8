//! Error types for the cache facade and its backend sessions.
//!
//! Two layers:
//!
//! - [`StoreError`] is what a backend session raises for a single call.
//! - [`Error`] is the facade taxonomy. Apart from configuration shape
//!   errors it never escapes a public cache operation; the guard reports
//!   it and converts it to a neutral result.

use std::fmt;

/// Result type for facade operations that can fail loudly.
pub type Result<T> = std::result::Result<T, Error>;

/// Backend call that a fault is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Probe,
    Get,
    MultiGet,
    Set,
    MultiSet,
    Delete,
    MultiDelete,
    Flush,
    TagDecode,
    Decode,
    Recover,
}

impl Operation {
    /// Short lowercase name used in log fields and messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Probe => "probe",
            Self::Get => "get",
            Self::MultiGet => "multi_get",
            Self::Set => "set",
            Self::MultiSet => "multi_set",
            Self::Delete => "delete",
            Self::MultiDelete => "multi_delete",
            Self::Flush => "flush",
            Self::TagDecode => "tag_decode",
            Self::Decode => "decode",
            Self::Recover => "recover",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault raised by a backend session for one call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No configured server could be reached.
    #[error("server unreachable: {server}")]
    Unreachable { server: String },

    /// The call did not complete within the configured timeout.
    #[error("{op} timed out after {timeout_ms}ms")]
    Timeout { op: String, timeout_ms: u64 },

    /// The backend answered with data that could not be interpreted.
    #[error("malformed response for '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// The backend refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Create an unreachable-server error.
    pub fn unreachable(server: impl Into<String>) -> Self {
        Self::Unreachable {
            server: server.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Facade errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Host/port configuration has a shape the topology resolver rejects.
    #[error("unsupported server configuration: {0}")]
    ConfigurationShapeMismatch(String),

    /// No backend client library is available.
    #[error("cache backend is not installed")]
    BackendNotInstalled,

    /// Connecting or probing the backend failed.
    #[error("cache backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// A single backend call failed.
    #[error("{op} failed: {source}")]
    OperationFault {
        op: Operation,
        #[source]
        source: StoreError,
    },

    /// A caller supplied recovery function failed.
    #[error("recovery for '{key}' failed: {reason}")]
    RecoveryFailed { key: String, reason: String },

    /// A value could not be encoded or decoded.
    #[error("serialization of '{key}' failed: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create an operation fault.
    pub fn operation(op: Operation, source: StoreError) -> Self {
        Self::OperationFault { op, source }
    }

    /// Create a backend unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a recovery error from the callback's `anyhow` error.
    pub fn recovery(key: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::RecoveryFailed {
            key: key.into(),
            reason: format!("{err:#}"),
        }
    }

    /// The backend call this error is attributed to, if any.
    pub fn operation_kind(&self) -> Option<Operation> {
        match self {
            Self::OperationFault { op, .. } => Some(*op),
            Self::RecoveryFailed { .. } => Some(Operation::Recover),
            Self::Serialization { .. } => Some(Operation::Decode),
            Self::BackendNotInstalled => Some(Operation::Connect),
            Self::BackendUnavailable { .. } => Some(Operation::Probe),
            Self::ConfigurationShapeMismatch(_) => None,
        }
    }
}
