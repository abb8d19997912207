//! Inspection of the host's live link table
//!
//! The host's network stack is the only source of truth for whether a
//! tagged device exists; nothing is cached between calls.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use vlan_tag_common::{CommandRunner, VlanTagError, VlanTagResult};

use crate::commands::build_show_link_details_cmd;
use crate::types::LinkState;

/// Matches the 802.1Q detail line of `ip -d link show`
static VLAN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"vlan protocol 802\.1Q id (\d+)").expect("Invalid regex pattern"));

/// Shell exit codes for "command not found" and "not executable"
const SHELL_UNAVAILABLE_EXIT_CODES: [i32; 2] = [126, 127];

/// Extract the 802.1Q tag from `ip -d link show` output
pub fn parse_vlan_id(output: &str) -> Option<u16> {
    output.lines().find_map(|line| {
        VLAN_ID_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Queries device state through `ip -d link show`
#[derive(Clone)]
pub struct VlanStateQuery {
    runner: Arc<dyn CommandRunner>,
    ip_cmd: String,
}

impl VlanStateQuery {
    /// Create a query using the given runner and `ip` path
    pub fn new(runner: Arc<dyn CommandRunner>, ip_cmd: impl Into<String>) -> Self {
        Self {
            runner,
            ip_cmd: ip_cmd.into(),
        }
    }

    /// Inspect a device
    ///
    /// A non-zero exit from `ip` means the device does not exist. Only a
    /// failure to run the tool at all is reported as an error.
    pub async fn inspect(&self, device: &str) -> VlanTagResult<LinkState> {
        let cmd = build_show_link_details_cmd(&self.ip_cmd, device);
        let result = self.runner.run(&cmd).await?;

        if SHELL_UNAVAILABLE_EXIT_CODES.contains(&result.exit_code) {
            return Err(VlanTagError::DeviceQuery {
                device: device.to_string(),
                command: cmd,
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        if !result.success() {
            debug!(device = %device, exit_code = result.exit_code, "Device not present");
            return Ok(LinkState::Absent);
        }

        let state = match parse_vlan_id(&result.stdout) {
            Some(id) => LinkState::Vlan(id),
            None => LinkState::Untagged,
        };
        debug!(device = %device, state = ?state, "Inspected device");
        Ok(state)
    }

    /// VLAN id of a device, `None` if it is absent or not a VLAN interface
    pub async fn query_vlan(&self, device: &str) -> VlanTagResult<Option<u16>> {
        Ok(self.inspect(device).await?.vlan_id())
    }
}
