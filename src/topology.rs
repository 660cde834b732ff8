//! Server topology resolution.
//!
//! Turns the configured host and port shapes into an ordered list of
//! [`ServerDescriptor`]s, one per host. Pure data transformation, no I/O.
//!
//! | host            | port                    | result                          |
//! |-----------------|-------------------------|---------------------------------|
//! | single          | single                  | one server, weight 1            |
//! | weighted map    | single                  | every host shares the port      |
//! | weighted map    | list, same length       | hosts and ports zipped          |
//! | weighted map    | list, different length  | every host uses the first port  |
//!
//! The last row mirrors how the memcached client configuration has always
//! behaved. It is kept as-is and logged at `warn` so a misconfigured
//! cluster is visible instead of silently half-working.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};


/// A server the backend session should register.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl ServerDescriptor {
    /// Create a new descriptor.
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
        }
    }

    /// `host:port` form used in logs and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (weight {})", self.host, self.port, self.weight)
    }
}

/// One entry of a weighted host mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedHost {
    pub address: String,
    pub weight: u32,
}

impl WeightedHost {
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

/// Configured host shape.
///
/// In TOML either `host = "10.0.0.1"` or an inline table mapping address to
/// weight, `host = { "10.0.0.1" = 1, "10.0.0.2" = 2 }`. Table order is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    Single(String),
    Weighted(Vec<WeightedHost>),
}

impl HostSpec {
    /// Number of hosts this spec describes.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Weighted(hosts) => hosts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a weighted spec from `(address, weight)` pairs.
    pub fn weighted<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self::Weighted(
            hosts
                .into_iter()
                .map(|(address, weight)| WeightedHost::new(address, weight))
                .collect(),
        )
    }

    fn entries(&self) -> Vec<(&str, u32)> {
        match self {
            Self::Single(address) => vec![(address.as_str(), 1)],
            Self::Weighted(hosts) => hosts
                .iter()
                .map(|h| (h.address.as_str(), h.weight))
                .collect(),
        }
    }
}

impl From<&str> for HostSpec {
    fn from(address: &str) -> Self {
        Self::Single(address.to_string())
    }
}

impl From<String> for HostSpec {
    fn from(address: String) -> Self {
        Self::Single(address)
    }
}

impl Serialize for HostSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Self::Single(address) => serializer.serialize_str(address),
            Self::Weighted(hosts) => {
                let mut map = serializer.serialize_map(Some(hosts.len()))?;
                for host in hosts {
                    map.serialize_entry(&host.address, &host.weight)?;
                }
                map.end()
            },
        }
    }
}

impl<'de> Deserialize<'de> for HostSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HostSpecVisitor;

        impl<'de> Visitor<'de> for HostSpecVisitor {
            type Value = HostSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a host address or a table of address = weight")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<HostSpec, E> {
                Ok(HostSpec::Single(v.to_string()))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<HostSpec, A::Error> {
                let mut hosts = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((address, weight)) = map.next_entry::<String, u32>()? {
                    hosts.push(WeightedHost { address, weight });
                }
                Ok(HostSpec::Weighted(hosts))
            }
        }

        deserializer.deserialize_any(HostSpecVisitor)
    }
}

/// Configured port shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Single(u16),
    PerHost(Vec<u16>),
}

impl From<u16> for PortSpec {
    fn from(port: u16) -> Self {
        Self::Single(port)
    }
}

impl From<Vec<u16>> for PortSpec {
    fn from(ports: Vec<u16>) -> Self {
        Self::PerHost(ports)
    }
}

/// Returns true when a per-host port list will be ignored in favour of its
/// first entry.
pub fn has_port_count_mismatch(host: &HostSpec, port: &PortSpec) -> bool {
    matches!(port, PortSpec::PerHost(ports) if !ports.is_empty() && ports.len() != host.len())
}

/// Resolve host and port shapes into server descriptors, in host order.
///
/// # Errors
///
/// Returns [`Error::ConfigurationShapeMismatch`] for an empty weighted host
/// table or an empty port list. Every other combination resolves.
pub fn resolve(host: &HostSpec, port: &PortSpec) -> Result<Vec<ServerDescriptor>> {
    let hosts = host.entries();
    if hosts.is_empty() {
        return Err(Error::ConfigurationShapeMismatch(
            "weighted host table is empty".into(),
        ));
    }

    let ports: Vec<u16> = match port {
        PortSpec::Single(p) => vec![*p; hosts.len()],
        PortSpec::PerHost(list) => {
            let Some(&first) = list.first() else {
                return Err(Error::ConfigurationShapeMismatch("port list is empty".into()));
            };
            if list.len() == hosts.len() {
                list.clone()
            } else {
                warn!(
                    hosts = hosts.len(),
                    ports = list.len(),
                    port = first,
                    "port list length does not match host count, using first port for every host"
                );
                vec![first; hosts.len()]
            }
        },
    };

    Ok(hosts
        .into_iter()
        .zip(ports)
        .map(|((address, weight), port)| ServerDescriptor::new(address, port, weight))
        .collect())
}
