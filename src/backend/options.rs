//! Provider tuning options and their defaults.
//!
//! The defaults table is built on demand and never mutated. Caller options
//! are merged over it: a default only fills in an option the caller left
//! unset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Option understood by backend sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOption {
    /// Ketama-compatible consistent hashing.
    CompatibleHashing,
    /// Poll timeout in milliseconds.
    PollTimeout,
    /// Send timeout in milliseconds.
    SendTimeout,
    /// Receive timeout in milliseconds.
    RecvTimeout,
    /// Compress stored values.
    Compression,
    /// Consecutive failures before a server is marked dead.
    ServerFailureLimit,
    /// Drop dead servers from the distribution.
    RemoveFailedServers,
    /// Value serializer.
    Serializer,
    /// Connect timeout in milliseconds.
    ConnectTimeout,
    /// Prefix prepended to every key by the session.
    PrefixKey,
}

/// Value serializer a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// Compact binary encoding, when the backend supports one.
    Binary,
    /// Portable encoding every backend understands.
    Generic,
}

/// Value of a provider option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(u64),
    Serializer(SerializerKind),
    Text(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for OptionValue {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<SerializerKind> for OptionValue {
    fn from(value: SerializerKind) -> Self {
        Self::Serializer(value)
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Set of provider options, keyed by option.
///
/// In TOML this is a plain table:
///
/// ```toml
/// [provider-options]
/// poll_timeout = 250
/// compression = true
/// serializer = "generic"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderOptions(BTreeMap<ProviderOption, OptionValue>);

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults.
    ///
    /// Does not include the serializer, which depends on what the session
    /// supports and is resolved at connect time.
    pub fn defaults() -> Self {
        let mut options = BTreeMap::new();
        options.insert(ProviderOption::CompatibleHashing, OptionValue::Bool(true));
        options.insert(
            ProviderOption::PollTimeout,
            OptionValue::Number(constants::DEFAULT_POLL_TIMEOUT_MS),
        );
        options.insert(
            ProviderOption::SendTimeout,
            OptionValue::Number(constants::DEFAULT_SEND_TIMEOUT_MS),
        );
        options.insert(
            ProviderOption::RecvTimeout,
            OptionValue::Number(constants::DEFAULT_RECV_TIMEOUT_MS),
        );
        options.insert(ProviderOption::Compression, OptionValue::Bool(false));
        options.insert(
            ProviderOption::ServerFailureLimit,
            OptionValue::Number(u64::from(constants::DEFAULT_SERVER_FAILURE_LIMIT)),
        );
        options.insert(ProviderOption::RemoveFailedServers, OptionValue::Bool(true));
        Self(options)
    }

    /// Set an option, builder style.
    #[must_use]
    pub fn with(mut self, option: ProviderOption, value: impl Into<OptionValue>) -> Self {
        self.0.insert(option, value.into());
        self
    }

    pub fn insert(&mut self, option: ProviderOption, value: impl Into<OptionValue>) {
        self.0.insert(option, value.into());
    }

    pub fn get(&self, option: ProviderOption) -> Option<&OptionValue> {
        self.0.get(&option)
    }

    pub fn contains(&self, option: ProviderOption) -> bool {
        self.0.contains_key(&option)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderOption, &OptionValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Caller options layered over [`ProviderOptions::defaults`].
    ///
    /// Every option set by the caller is kept as-is.
    #[must_use]
    pub fn merged_over_defaults(&self) -> Self {
        let mut merged = Self::defaults();
        for (option, value) in &self.0 {
            merged.0.insert(*option, value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_table() {
        let defaults = ProviderOptions::defaults();
        assert_eq!(
            defaults.get(ProviderOption::CompatibleHashing),
            Some(&OptionValue::Bool(true))
        );
        assert_eq!(
            defaults.get(ProviderOption::PollTimeout),
            Some(&OptionValue::Number(500))
        );
        assert_eq!(
            defaults.get(ProviderOption::ServerFailureLimit),
            Some(&OptionValue::Number(5))
        );
        assert!(!defaults.contains(ProviderOption::Serializer));
    }

    #[test]
    fn test_option_value_accessors() {
        let defaults = ProviderOptions::defaults();
        let hashing = defaults.get(ProviderOption::CompatibleHashing).unwrap();
        assert_eq!(hashing.as_bool(), Some(true));
        assert_eq!(hashing.as_number(), None);

        let send = defaults.get(ProviderOption::SendTimeout).unwrap();
        assert_eq!(send.as_number(), Some(1000));
        assert_eq!(send.as_text(), None);

        assert_eq!(OptionValue::from("app:".to_string()).as_text(), Some("app:"));
        assert_eq!(OptionValue::from(SerializerKind::Binary).as_bool(), None);
    }

    #[test]
    fn test_caller_options_win() {
        let caller = ProviderOptions::new()
            .with(ProviderOption::Compression, true)
            .with(ProviderOption::PollTimeout, 50u64);

        let merged = caller.merged_over_defaults();
        assert_eq!(merged.get(ProviderOption::Compression), Some(&OptionValue::Bool(true)));
        assert_eq!(merged.get(ProviderOption::PollTimeout), Some(&OptionValue::Number(50)));
        // untouched defaults still present
        assert_eq!(
            merged.get(ProviderOption::RemoveFailedServers),
            Some(&OptionValue::Bool(true))
        );
    }

    #[test]
    fn test_parse_from_toml_table() {
        let options: ProviderOptions =
            toml::from_str("poll_timeout = 250\ncompression = true\nserializer = \"generic\"")
                .unwrap();
        assert_eq!(options.get(ProviderOption::PollTimeout), Some(&OptionValue::Number(250)));
        assert_eq!(options.get(ProviderOption::Compression), Some(&OptionValue::Bool(true)));
        assert_eq!(
            options.get(ProviderOption::Serializer),
            Some(&OptionValue::Serializer(SerializerKind::Generic))
        );
    }
}
