//! Connection state and session establishment.
//!
//! [`ConnectionSession`] owns the backend session handle. It either reuses a
//! persistent session that already has servers, or configures a fresh one
//! (options, connect timeout, servers), probes it, and installs the
//! `<database>:` key prefix.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{
    OptionValue, ProviderOption, SerializerKind, StoreProvider, StoreSession,
};
use crate::config::CacheConfig;
use crate::error::{Error, Operation, Result};
use crate::guard::FaultReporter;
use crate::topology::ServerDescriptor;

/// Connection flags of one facade.
///
/// `enabled` implies `connected`, which implies `installed`. Only the
/// connect path sets `connected`; the guard may clear `enabled`.
#[derive(Debug)]
pub struct ConnectionState {
    installed: bool,
    connected: AtomicBool,
    enabled: AtomicBool,
}

impl ConnectionState {
    pub fn new(installed: bool) -> Self {
        Self {
            installed,
            connected: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Mark connected and enabled.
    pub(crate) fn mark_connected(&self) {
        debug_assert!(self.installed);
        self.connected.store(true, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
    }

    /// Mark disconnected and disabled.
    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.enabled.store(false, Ordering::Release);
    }

    /// Clear `enabled`. Returns true if it was set.
    pub(crate) fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    /// Set `enabled`, refusing to enable while disconnected.
    ///
    /// Returns the resulting value.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let value = enabled && self.is_connected();
        self.enabled.store(value, Ordering::Release);
        value
    }
}

/// Owns the backend session of one facade.
pub struct ConnectionSession {
    config: CacheConfig,
    servers: Vec<ServerDescriptor>,
    provider: Arc<dyn StoreProvider>,
    handle: RwLock<Option<Arc<dyn StoreSession>>>,
    state: Arc<ConnectionState>,
}

impl ConnectionSession {
    /// Resolve the topology and check the provider; does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationShapeMismatch`] when the host/port
    /// configuration cannot be resolved.
    pub fn new(config: CacheConfig, provider: Arc<dyn StoreProvider>) -> Result<Self> {
        let servers = config.servers()?;
        let state = Arc::new(ConnectionState::new(provider.is_installed()));
        Ok(Self {
            config,
            servers,
            provider,
            handle: RwLock::new(None),
            state,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Servers registered on a fresh session.
    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// Current session handle, if connected.
    pub fn handle(&self) -> Option<Arc<dyn StoreSession>> {
        self.handle.read().clone()
    }

    /// Connect to the backend.
    ///
    /// Idempotent while connected. A session disabled by a fault is probed
    /// again and re-enabled if a server answers. Faults are reported through
    /// `reporter`, never returned.
    pub fn connect(&self, reporter: &dyn FaultReporter) -> bool {
        if self.state.is_connected() {
            if !self.state.is_enabled() {
                self.reprobe();
            }
            return true;
        }

        if !self.state.is_installed() {
            reporter.report(&Error::BackendNotInstalled);
            warn!(cache = %self.config.name, "cache backend not installed, cache disabled");
            self.state.mark_disconnected();
            return false;
        }

        match self.establish() {
            Ok(session) => {
                *self.handle.write() = Some(session);
                self.state.mark_connected();
                info!(
                    cache = %self.config.name,
                    servers = self.servers.len(),
                    prefix = %self.config.key_prefix(),
                    "cache connected"
                );
                true
            },
            Err(err) => {
                reporter.report(&err);
                self.state.mark_disconnected();
                warn!(cache = %self.config.name, error = %err, "cache connect failed, cache disabled");
                false
            },
        }
    }

    fn establish(&self) -> Result<Arc<dyn StoreSession>> {
        let session = self
            .provider
            .open_session(self.config.persistence_id.as_deref())
            .map_err(|e| Error::operation(Operation::Connect, e))?;

        if session.is_persistent() && !session.server_list().is_empty() {
            debug!(
                cache = %self.config.name,
                servers = session.server_list().len(),
                "reusing configured persistent session"
            );
        } else {
            self.configure(session.as_ref())
                .map_err(|e| Error::operation(Operation::Connect, e))?;
            let version = session
                .version()
                .ok_or_else(|| Error::unavailable("no server answered the version probe"))?;
            debug!(cache = %self.config.name, %version, "backend probe succeeded");
        }

        session
            .set_option(
                ProviderOption::PrefixKey,
                OptionValue::Text(self.config.key_prefix()),
            )
            .map_err(|e| Error::operation(Operation::Connect, e))?;
        Ok(session)
    }

    fn configure(&self, session: &dyn StoreSession) -> crate::backend::StoreResult<()> {
        let mut options = self.config.provider.merged_over_defaults();
        if !options.contains(ProviderOption::Serializer) {
            let serializer = if session.supports_binary_serializer() {
                SerializerKind::Binary
            } else {
                SerializerKind::Generic
            };
            options.insert(ProviderOption::Serializer, serializer);
        }

        session.set_option(
            ProviderOption::ConnectTimeout,
            OptionValue::Number(self.config.connect_timeout_ms()),
        )?;
        for (option, value) in options.iter() {
            session.set_option(option, value.clone())?;
        }
        for server in &self.servers {
            session.add_server(server)?;
        }
        Ok(())
    }

    fn reprobe(&self) {
        let Some(session) = self.handle() else {
            return;
        };
        if session.version().is_some() {
            self.state.set_enabled(true);
            info!(cache = %self.config.name, "cache re-enabled after successful probe");
        } else {
            debug!(cache = %self.config.name, "backend still unavailable, cache stays disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryProvider, ProviderOptions};
    use crate::guard::TracingReporter;
    use crate::topology::HostSpec;

    fn config() -> CacheConfig {
        CacheConfig::default().with_database("app")
    }

    #[test]
    fn test_state_invariants() {
        let state = ConnectionState::new(true);
        assert!(!state.set_enabled(true), "cannot enable while disconnected");

        state.mark_connected();
        assert!(state.is_enabled());
        assert!(state.disable());
        assert!(!state.disable());
        assert!(state.is_connected());
        assert!(state.set_enabled(true));
    }

    #[test]
    fn test_connect_configures_fresh_session() {
        let provider = MemoryProvider::new();
        let session = ConnectionSession::new(config(), Arc::new(provider)).unwrap();

        assert!(session.connect(&TracingReporter));
        assert!(session.state().is_enabled());

        let handle = session.handle().unwrap();
        assert_eq!(handle.server_list(), session.servers());
        assert_eq!(session.servers(), [ServerDescriptor::new("127.0.0.1", 11211, 1)]);
        assert_eq!(
            handle.get_option(ProviderOption::PrefixKey),
            Some(OptionValue::Text("app:".into()))
        );
        assert_eq!(
            handle.get_option(ProviderOption::ConnectTimeout),
            Some(OptionValue::Number(500))
        );
        assert_eq!(
            handle.get_option(ProviderOption::Serializer),
            Some(OptionValue::Serializer(SerializerKind::Binary))
        );
    }

    #[test]
    fn test_serializer_falls_back_to_generic() {
        let provider = MemoryProvider::new().with_binary_serializer(false);
        let session = ConnectionSession::new(config(), Arc::new(provider)).unwrap();
        assert!(session.connect(&TracingReporter));

        let handle = session.handle().unwrap();
        assert_eq!(
            handle.get_option(ProviderOption::Serializer),
            Some(OptionValue::Serializer(SerializerKind::Generic))
        );
    }

    #[test]
    fn test_caller_options_are_not_overridden() {
        let options = ProviderOptions::new()
            .with(ProviderOption::Compression, true)
            .with(ProviderOption::Serializer, SerializerKind::Generic);
        let provider = MemoryProvider::new();
        let session =
            ConnectionSession::new(config().with_provider_options(options), Arc::new(provider))
                .unwrap();
        assert!(session.connect(&TracingReporter));

        let handle = session.handle().unwrap();
        assert_eq!(handle.get_option(ProviderOption::Compression), Some(OptionValue::Bool(true)));
        assert_eq!(
            handle.get_option(ProviderOption::Serializer),
            Some(OptionValue::Serializer(SerializerKind::Generic))
        );
        assert_eq!(
            handle.get_option(ProviderOption::PollTimeout),
            Some(OptionValue::Number(500))
        );
    }

    #[test]
    fn test_not_installed() {
        let session =
            ConnectionSession::new(config(), Arc::new(MemoryProvider::not_installed())).unwrap();
        assert!(!session.connect(&TracingReporter));
        assert!(!session.state().is_installed());
        assert!(!session.state().is_enabled());
        assert!(session.handle().is_none());
    }

    #[test]
    fn test_unreachable_probe_fails_connect() {
        let provider = MemoryProvider::new();
        provider.set_reachable(false);
        let session = ConnectionSession::new(config(), Arc::new(provider)).unwrap();

        assert!(!session.connect(&TracingReporter));
        assert!(!session.state().is_connected());
        assert!(!session.state().is_enabled());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let session = ConnectionSession::new(config(), Arc::new(MemoryProvider::new())).unwrap();
        assert!(session.connect(&TracingReporter));
        let first = session.handle().unwrap();
        assert!(session.connect(&TracingReporter));
        let second = session.handle().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.server_list().len(), 1);
    }

    #[test]
    fn test_persistent_session_skips_server_registration() {
        let provider = MemoryProvider::new();
        let cfg = config()
            .with_persistence_id("pool")
            .with_host(HostSpec::weighted([("a", 1), ("b", 2)]));

        let first = ConnectionSession::new(cfg.clone(), Arc::new(provider.clone())).unwrap();
        assert!(first.connect(&TracingReporter));
        let second = ConnectionSession::new(cfg, Arc::new(provider)).unwrap();
        assert!(second.connect(&TracingReporter));

        assert_eq!(second.handle().unwrap().server_list().len(), 2);
    }

    #[test]
    fn test_shape_mismatch_fails_construction() {
        let cfg = config().with_host(HostSpec::Weighted(vec![]));
        let err = ConnectionSession::new(cfg, Arc::new(MemoryProvider::new()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConfigurationShapeMismatch(_)));
    }
}
