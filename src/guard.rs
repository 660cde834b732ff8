//! Degraded-mode guard.
//!
//! Every backend call goes through [`Guard::call`] on its own. A failing
//! call is reported through the [`FaultReporter`], switches the facade to
//! disabled, and yields the neutral value the caller supplied. Nothing
//! propagates, so the remaining calls of a multi-step operation still run.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backend::StoreResult;
use crate::error::{Error, Operation};
use crate::session::ConnectionState;

/// Sink for faults the cache absorbs.
///
/// Implemented for any `Fn(&Error) + Send + Sync`, so a closure works:
///
/// ```ignore
/// let cache = CacheFacade::new(config, provider)?
///     .with_reporter(|err: &memtag::Error| tracing::warn!(error = %err, "cache fault"));
/// ```
pub trait FaultReporter: Send + Sync {
    fn report(&self, error: &Error);
}

impl<F> FaultReporter for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn report(&self, error: &Error) {
        self(error);
    }
}

/// Default reporter: logs every fault at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, err: &Error) {
        error!(
            op = err.operation_kind().map(Operation::as_str),
            error = %err,
            "cache fault"
        );
    }
}

/// Wraps backend calls, converting faults into neutral results.
#[derive(Clone)]
pub struct Guard {
    state: Arc<ConnectionState>,
    reporter: Arc<dyn FaultReporter>,
}

impl Guard {
    pub fn new(state: Arc<ConnectionState>, reporter: Arc<dyn FaultReporter>) -> Self {
        Self { state, reporter }
    }

    /// Run one backend call.
    ///
    /// On failure the fault is reported, the facade is disabled and
    /// `neutral` is returned.
    pub fn call<T>(&self, op: Operation, neutral: T, f: impl FnOnce() -> StoreResult<T>) -> T {
        match f() {
            Ok(value) => value,
            Err(source) => {
                self.fault(Error::operation(op, source));
                neutral
            },
        }
    }

    /// Run a caller supplied recovery function for `key`.
    ///
    /// Its failure is reported and read as "no value". Recovery code is not
    /// the backend, so it never disables the facade.
    pub fn recover<T>(&self, key: &str, f: impl FnOnce() -> anyhow::Result<Option<T>>) -> Option<T> {
        match f() {
            Ok(value) => value,
            Err(err) => {
                self.report(&Error::recovery(key, &err));
                None
            },
        }
    }

    /// Report a backend fault and disable the facade.
    pub fn fault(&self, err: Error) {
        debug!(error = %err, "backend call failed");
        self.reporter.report(&err);
        if self.state.disable() {
            warn!("cache disabled after backend fault, reconnect to re-enable");
        }
    }

    /// Report without touching the connection state.
    pub fn report(&self, err: &Error) {
        self.reporter.report(err);
    }

    pub fn reporter(&self) -> &Arc<dyn FaultReporter> {
        &self.reporter
    }
}
