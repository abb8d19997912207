//! Shell command builders for tagged interface operations

use std::path::Path;

use vlan_tag_common::{shellarg, LinkOptions};

use crate::types::{NicConfig, NotifyAction};

/// Render link options as `<option> <value>` pairs, in order
///
/// Booleans become `on`/`off`; other values are passed through. An empty
/// value leaves the option name on its own.
pub fn render_link_options(options: &LinkOptions) -> String {
    options
        .iter()
        .map(|(name, value)| match value.to_string() {
            v if v.is_empty() => shellarg(name),
            v => format!("{} {}", shellarg(name), shellarg(&v)),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build link inspection command (with details, for the VLAN tag)
pub fn build_show_link_details_cmd(ip_cmd: &str, name: &str) -> String {
    format!("{} -d link show {}", ip_cmd, shellarg(name))
}

/// Build link existence check command
pub fn build_show_link_cmd(ip_cmd: &str, name: &str) -> String {
    format!("{} link show {}", ip_cmd, shellarg(name))
}

/// Build tagged device creation command
pub fn build_add_vlan_cmd(ip_cmd: &str, nic: &NicConfig, mtu: u32, options: &LinkOptions) -> String {
    let mut cmd = format!(
        "{} link add link {} name {} mtu {} type vlan id {}",
        ip_cmd,
        shellarg(&nic.physical_device),
        shellarg(&nic.tagged_device_name),
        mtu,
        nic.vlan_id
    );
    if !options.is_empty() {
        cmd.push(' ');
        cmd.push_str(&render_link_options(options));
    }
    cmd
}

/// Build set link up command
pub fn build_set_link_up_cmd(ip_cmd: &str, name: &str) -> String {
    format!("{} link set {} up", ip_cmd, shellarg(name))
}

/// Build link deletion command
pub fn build_delete_link_cmd(ip_cmd: &str, name: &str) -> String {
    format!("{} link delete {}", ip_cmd, shellarg(name))
}

/// Build fabric notifier invocation: `<notifier> <action> <vlan_id> <host>`
pub fn build_notify_cmd(notifier: &Path, action: NotifyAction, vlan_id: u16, host: &str) -> String {
    format!(
        "{} {} {} {}",
        shellarg(&notifier.to_string_lossy()),
        action.as_str(),
        vlan_id,
        shellarg(host)
    )
}
