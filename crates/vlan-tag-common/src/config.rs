//! Host-wide configuration.
//!
//! Loaded once per invocation from an optional YAML file. Every key has a
//! default, so an empty or missing file yields a working configuration.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{VlanTagError, VlanTagResult};
use crate::shell::IP_CMD;

/// Default values for host configuration.
pub mod defaults {
    /// Default MTU for tagged devices.
    pub const VLAN_MTU: u32 = 1500;

    /// Default directory for per-device lock files.
    pub const LOCK_DIR: &str = "/var/lock/vlan-tag";

    /// Default host configuration file.
    pub const CONFIG_PATH: &str = "/etc/vlan-tag/driver.yaml";
}

/// Value of a single `ip link` option.
///
/// Numbers are kept as their decimal text. A null value becomes an empty
/// `Raw`, which renders the option name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LinkOptionValue {
    /// Rendered as `on` / `off`.
    Flag(bool),
    /// Passed through verbatim.
    Raw(String),
}

impl<'de> Deserialize<'de> for LinkOptionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = LinkOptionValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, number, string or null")
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Flag(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(v.to_string()))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(v.to_string()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(v))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(LinkOptionValue::Raw(String::new()))
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                self.visit_unit()
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_any(self)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

impl LinkOptionValue {
    /// Parses a command-line token; `true`/`false` become flags.
    pub fn parse_token(token: &str) -> Self {
        match token {
            "true" => LinkOptionValue::Flag(true),
            "false" => LinkOptionValue::Flag(false),
            other => LinkOptionValue::Raw(other.to_string()),
        }
    }
}

impl fmt::Display for LinkOptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkOptionValue::Flag(true) => f.write_str("on"),
            LinkOptionValue::Flag(false) => f.write_str("off"),
            LinkOptionValue::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Ordered `ip link` options.
///
/// Insertion order is preserved, and replacing an existing option keeps its
/// original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions(Vec<(String, LinkOptionValue)>);

impl LinkOptions {
    /// Creates an empty option list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option, replacing the value in place if it already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: LinkOptionValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((name, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: LinkOptionValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Gets the value of an option, if present.
    pub fn get(&self, name: &str) -> Option<&LinkOptionValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns true if no options are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over options in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LinkOptionValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns `self` layered over `base`: options from `base` first, values
    /// from `self` winning on conflict.
    pub fn merged_over(&self, base: &LinkOptions) -> LinkOptions {
        let mut merged = base.clone();
        for (name, value) in &self.0 {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

impl FromIterator<(String, LinkOptionValue)> for LinkOptions {
    fn from_iter<I: IntoIterator<Item = (String, LinkOptionValue)>>(iter: I) -> Self {
        let mut options = LinkOptions::new();
        for (name, value) in iter {
            options.insert(name, value);
        }
        options
    }
}

impl Serialize for LinkOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LinkOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LinkOptionsVisitor;

        impl<'de> Visitor<'de> for LinkOptionsVisitor {
            type Value = LinkOptions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of link option names to values")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(LinkOptions::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut options = LinkOptions::new();
                while let Some((name, value)) = access.next_entry::<String, LinkOptionValue>()? {
                    options.insert(name, value);
                }
                Ok(options)
            }
        }

        deserializer.deserialize_map(LinkOptionsVisitor)
    }
}

/// Host-wide driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Path to the `ip` tool.
    pub ip_command: String,
    /// MTU used when a NIC does not specify one.
    pub vlan_mtu: u32,
    /// Link options applied to every tagged device, under NIC options.
    pub ip_link_conf: LinkOptions,
    /// Fabric notifier executable; notification is disabled when unset.
    pub fabric_notifier: Option<PathBuf>,
    /// Directory for cross-process lock files; in-process locking only when unset.
    pub lock_dir: Option<PathBuf>,
    /// Whether lifecycle operations take the per-device lock.
    pub locking: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ip_command: IP_CMD.to_string(),
            vlan_mtu: defaults::VLAN_MTU,
            ip_link_conf: LinkOptions::new(),
            fabric_notifier: None,
            lock_dir: Some(PathBuf::from(defaults::LOCK_DIR)),
            locking: true,
        }
    }
}

impl HostConfig {
    /// Parses configuration from YAML text.
    pub fn from_yaml(path: &Path, text: &str) -> VlanTagResult<Self> {
        // An empty document deserializes to unit, not to a map.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: HostConfig =
            serde_yaml::from_str(text).map_err(|e| VlanTagError::ConfigLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn load(path: &Path) -> VlanTagResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VlanTagError::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(path, &text)
    }

    /// Loads configuration from a file, falling back to defaults if the
    /// file does not exist.
    pub fn load_or_default(path: &Path) -> VlanTagResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No host configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Checks values that have no meaningful interpretation.
    pub fn validate(&self) -> VlanTagResult<()> {
        if self.vlan_mtu == 0 {
            return Err(VlanTagError::invalid_config("vlan_mtu", "must be positive"));
        }
        if self.ip_command.trim().is_empty() {
            return Err(VlanTagError::invalid_config("ip_command", "must not be empty"));
        }
        Ok(())
    }
}
