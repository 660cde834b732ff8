//! Cache connection configuration.
//!
//! [`CacheConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! name = "catalog"
//! persistence-id = "catalog-pool"
//! host = { "10.0.0.10" = 1, "10.0.0.11" = 2 }
//! port = [11211, 11212]
//! database = "shop"
//! timeout = 0.5
//!
//! [provider-options]
//! compression = true
//! ```
//!
//! Every key is optional; missing keys take the defaults from
//! [`crate::constants`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::ProviderOptions;
use crate::constants;
use crate::topology::{self, HostSpec, PortSpec, ServerDescriptor};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Connection settings for one logical cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    /// Reuse a session shared under this id.
    pub persistence_id: Option<String>,
    /// Logical cache name.
    pub name: String,
    pub host: HostSpec,
    pub port: PortSpec,
    /// Namespace for the key prefix; the machine host name when unset.
    pub database: Option<String>,
    /// Connect timeout in seconds.
    pub timeout: f64,
    /// Raw backend tuning, merged over the built-in defaults.
    #[serde(rename = "provider-options")]
    pub provider: ProviderOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistence_id: None,
            name: constants::DEFAULT_NAME.to_string(),
            host: HostSpec::Single(constants::DEFAULT_HOST.to_string()),
            port: PortSpec::Single(constants::DEFAULT_PORT),
            database: None,
            timeout: constants::DEFAULT_TIMEOUT_SECS,
            provider: ProviderOptions::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from the specified TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - A key has an invalid type
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache config: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse cache config: {}", path.display()))
    }

    /// Parse configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or a key has an
    /// invalid type.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid cache configuration")
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_persistence_id(mut self, id: impl Into<String>) -> Self {
        self.persistence_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<HostSpec>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: impl Into<PortSpec>) -> Self {
        self.port = port.into();
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    #[must_use]
    pub fn with_provider_options(mut self, options: ProviderOptions) -> Self {
        self.provider = options;
        self
    }

    /// Database namespace, falling back to the machine host name.
    pub fn database_name(&self) -> String {
        if let Some(database) = self.database.as_deref().filter(|d| !d.is_empty()) {
            return database.to_string();
        }
        ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| constants::FALLBACK_DATABASE.to_string())
    }

    /// Prefix the session applies to every key: `<database>:`.
    pub fn key_prefix(&self) -> String {
        format!("{}{}", self.database_name(), constants::KEY_PREFIX_SEPARATOR)
    }

    /// Connect timeout in whole milliseconds.
    pub fn connect_timeout_ms(&self) -> u64 {
        if self.timeout.is_finite() && self.timeout > 0.0 {
            (self.timeout * 1000.0).round() as u64
        } else {
            0
        }
    }

    /// Servers described by `host` and `port`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConfigurationShapeMismatch`] for shapes the
    /// resolver rejects.
    pub fn servers(&self) -> crate::Result<Vec<ServerDescriptor>> {
        topology::resolve(&self.host, &self.port)
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found:
    /// - Empty name or host address
    /// - Zero weight or zero port
    /// - Empty host table or port list
    /// - Negative or non-finite timeout
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name cannot be empty".to_string());
        }

        match &self.host {
            HostSpec::Single(address) if address.trim().is_empty() => {
                errors.push("host cannot be empty".to_string());
            },
            HostSpec::Single(_) => {},
            HostSpec::Weighted(hosts) if hosts.is_empty() => {
                errors.push("host table must list at least one server".to_string());
            },
            HostSpec::Weighted(hosts) => {
                for host in hosts {
                    if host.address.trim().is_empty() {
                        errors.push("host address cannot be empty".to_string());
                    }
                    if host.weight == 0 {
                        errors.push(format!(
                            "weight for '{}' must be a positive integer",
                            host.address
                        ));
                    }
                }
            },
        }

        match &self.port {
            PortSpec::Single(0) => errors.push("port cannot be 0".to_string()),
            PortSpec::Single(_) => {},
            PortSpec::PerHost(ports) if ports.is_empty() => {
                errors.push("port list cannot be empty".to_string());
            },
            PortSpec::PerHost(ports) => {
                if ports.contains(&0) {
                    errors.push("port list cannot contain 0".to_string());
                }
            },
        }

        if topology::has_port_count_mismatch(&self.host, &self.port) {
            warnings.push(format!(
                "port list has a different length than the host list ({} hosts), \
                 only the first port will be used for every host",
                self.host.len()
            ));
        }

        if !self.timeout.is_finite() || self.timeout < 0.0 {
            errors.push(format!("timeout must be a non-negative number of seconds (got: {})", self.timeout));
        } else if self.timeout > constants::MAX_RECOMMENDED_TIMEOUT_SECS {
            warnings.push(format!(
                "timeout of {}s is unusually long for a cache, callers block for up to this long",
                self.timeout
            ));
        }

        if errors.is_empty() {
            Ok(ValidationResult { warnings })
        } else {
            anyhow::bail!("Configuration validation failed:\n  - {}", errors.join("\n  - "))
        }
    }
}
