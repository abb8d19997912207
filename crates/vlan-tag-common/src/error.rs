//! Error types for VLAN tagging operations.
//!
//! Every failure that originates from an external command keeps the exact
//! command line, its exit code and its output, because that text is the only
//! diagnostic an operator gets back from the host.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for VLAN tagging operations.
pub type VlanTagResult<T> = Result<T, VlanTagError>;

/// Error text `ip link add` prints when the device name is already taken.
const DEVICE_EXISTS_MARKER: &str = "File exists";

/// Error texts `ip` prints when the named device is missing.
const DEVICE_ABSENT_MARKERS: &[&str] = &["Cannot find device", "does not exist"];

/// Errors that can occur while managing tagged interfaces.
#[derive(Debug, Error)]
pub enum VlanTagError {
    /// Failed to spawn a command at all.
    #[error("Failed to execute command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The inspection command failed for a reason other than "not found".
    #[error("Failed to query device '{device}': '{command}' (exit code {exit_code}): {output}")]
    DeviceQuery {
        /// Device being inspected.
        device: String,
        /// The inspection command.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// A create/set/delete command returned non-zero.
    #[error("Device command failed: '{command}' (exit code {exit_code}): {output}")]
    DeviceMutation {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The external fabric notifier returned non-zero.
    #[error(
        "Fabric notification '{action}' for VLAN {vlan_id} on host '{host}' failed: \
         '{command}' (exit code {exit_code}): {output}"
    )]
    FabricNotification {
        /// Notification action (`pre` or `clean`).
        action: String,
        /// VLAN id being announced.
        vlan_id: u16,
        /// Host identifier passed to the notifier.
        host: String,
        /// The notifier command line.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The per-device lock could not be obtained.
    #[error("Failed to acquire lock for '{device}' at {}: {source}", .path.display())]
    LockAcquisition {
        /// Physical device the lock protects.
        device: String,
        /// Lock file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The tagged device exists but carries another tag (or none).
    #[error("Device '{device}' already exists with VLAN {}, expected VLAN {expected}",
        .actual.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()))]
    VlanMismatch {
        /// Tagged device name.
        device: String,
        /// Requested VLAN id.
        expected: u16,
        /// VLAN id found on the host, `None` if the device is not a VLAN.
        actual: Option<u16>,
    },

    /// The kernel refused the creation because another device already
    /// carries this tag on the physical device.
    #[error(
        "VLAN {vlan_id} is already in use on '{physical_device}' by another device, \
         cannot create '{device}': '{command}': {output}"
    )]
    VlanInUse {
        /// Physical device carrying the tag.
        physical_device: String,
        /// Requested VLAN id.
        vlan_id: u16,
        /// Requested tagged device name.
        device: String,
        /// The creation command.
        command: String,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The physical device could not be prepared for tagging.
    #[error("Physical device '{device}' is not usable: {message}")]
    PhysicalDevice {
        /// The physical device name.
        device: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Host configuration file could not be read or parsed.
    #[error("Failed to load configuration from {}: {message}", .path.display())]
    ConfigLoad {
        /// Path of the configuration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

impl VlanTagError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a physical device error.
    pub fn physical_device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PhysicalDevice {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a mutation failure caused by the device
    /// already existing.
    pub fn is_device_exists(&self) -> bool {
        match self {
            VlanTagError::DeviceMutation { output, .. } => output.contains(DEVICE_EXISTS_MARKER),
            _ => false,
        }
    }

    /// Returns true if this is a mutation failure caused by the device
    /// being absent.
    pub fn is_device_absent(&self) -> bool {
        match self {
            VlanTagError::DeviceMutation { output, .. } => DEVICE_ABSENT_MARKERS
                .iter()
                .any(|marker| output.contains(marker)),
            _ => false,
        }
    }
}
