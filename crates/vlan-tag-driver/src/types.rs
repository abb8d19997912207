//! Type definitions for the VLAN tagging driver

use serde::{Deserialize, Serialize};
use std::fmt;

use vlan_tag_common::{LinkOptionValue, LinkOptions, VlanTagError, VlanTagResult};

/// Lowest usable 802.1Q VLAN id
pub const MIN_VLAN_ID: u16 = 1;

/// Highest usable 802.1Q VLAN id
pub const MAX_VLAN_ID: u16 = 4094;

/// Longest Linux interface name (IFNAMSIZ - 1)
pub const MAX_IFNAME_LEN: usize = 15;

/// Configuration of one VM network interface handled by this driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConfig {
    /// Host device the tagged interface is stacked on
    pub physical_device: String,
    /// 802.1Q tag
    pub vlan_id: u16,
    /// Name of the tagged sub-interface
    pub tagged_device_name: String,
    /// MTU, host default when absent
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Options appended to `ip link add`
    #[serde(default)]
    pub link_options: LinkOptions,
}

impl NicConfig {
    /// Create a NIC config using the conventional `<phydev>.<vlan_id>` name
    pub fn new(physical_device: impl Into<String>, vlan_id: u16) -> Self {
        let physical_device = physical_device.into();
        let tagged_device_name = format!("{}.{}", physical_device, vlan_id);
        Self {
            physical_device,
            vlan_id,
            tagged_device_name,
            mtu: None,
            link_options: LinkOptions::new(),
        }
    }

    /// Override the tagged device name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.tagged_device_name = name.into();
        self
    }

    /// Set an explicit MTU
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Append a link option
    pub fn with_link_option(mut self, name: impl Into<String>, value: LinkOptionValue) -> Self {
        self.link_options.insert(name, value);
        self
    }

    /// True when the tagged device name refers to the physical device itself
    pub fn targets_physical_device(&self) -> bool {
        self.tagged_device_name == self.physical_device
    }

    /// Reject records that cannot describe a valid tagged interface
    pub fn validate(&self) -> VlanTagResult<()> {
        validate_ifname("physical_device", &self.physical_device)?;
        validate_ifname("tagged_device_name", &self.tagged_device_name)?;

        if !(MIN_VLAN_ID..=MAX_VLAN_ID).contains(&self.vlan_id) {
            return Err(VlanTagError::invalid_config(
                "vlan_id",
                format!(
                    "{} is outside {}..={}",
                    self.vlan_id, MIN_VLAN_ID, MAX_VLAN_ID
                ),
            ));
        }

        if self.mtu == Some(0) {
            return Err(VlanTagError::invalid_config("mtu", "must be positive"));
        }

        Ok(())
    }
}

fn validate_ifname(field: &str, name: &str) -> VlanTagResult<()> {
    if name.is_empty() {
        return Err(VlanTagError::invalid_config(field, "must not be empty"));
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(VlanTagError::invalid_config(
            field,
            format!("'{}' is longer than {} bytes", name, MAX_IFNAME_LEN),
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(VlanTagError::invalid_config(
            field,
            format!("'{}' contains whitespace or '/'", name),
        ));
    }
    Ok(())
}

/// Per-call host context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Host identifier passed to the fabric notifier
    pub host: String,
    /// Whether lifecycle operations take the per-device lock
    pub locking: bool,
}

impl HostContext {
    /// Create a context with locking enabled
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            locking: true,
        }
    }

    /// Disable locking, for callers that already serialize access
    pub fn without_locking(mut self) -> Self {
        self.locking = false;
        self
    }
}

/// Fabric notification action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyAction {
    /// VLAN is about to be used on this host
    Pre,
    /// VLAN is no longer used on this host
    Clean,
}

impl NotifyAction {
    /// Convert to the notifier's positional argument
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyAction::Pre => "pre",
            NotifyAction::Clean => "clean",
        }
    }
}

impl fmt::Display for NotifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host's link table says about a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No such device
    Absent,
    /// Device exists but is not an 802.1Q interface
    Untagged,
    /// 802.1Q interface with the given tag
    Vlan(u16),
}

impl LinkState {
    /// VLAN id if the device is an 802.1Q interface
    pub fn vlan_id(&self) -> Option<u16> {
        match self {
            LinkState::Vlan(id) => Some(*id),
            _ => None,
        }
    }
}
