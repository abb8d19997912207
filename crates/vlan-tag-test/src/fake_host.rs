//! In-memory emulation of a host's link table
//!
//! Understands the subset of `ip` invocations the driver issues and answers
//! them with the same exit codes and error texts iproute2 produces. Any
//! other program is treated as the fabric notifier.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use vlan_tag_common::{CommandRunner, ExecResult, VlanTagResult};

/// A link known to the fake host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeLink {
    /// Device name
    pub name: String,
    /// Lower device for VLAN links
    pub parent: Option<String>,
    /// 802.1Q tag for VLAN links
    pub vlan_id: Option<u16>,
    /// MTU
    pub mtu: u32,
    /// Administrative state
    pub up: bool,
    /// Extra `ip link add` tokens after the VLAN id
    pub options: Vec<String>,
}

impl FakeLink {
    /// A physical device
    pub fn physical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            vlan_id: None,
            mtu: 1500,
            up: true,
            options: Vec::new(),
        }
    }

    /// A VLAN device on top of `parent`
    pub fn vlan(name: impl Into<String>, parent: impl Into<String>, vlan_id: u16) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            vlan_id: Some(vlan_id),
            mtu: 1500,
            up: false,
            options: Vec::new(),
        }
    }

    fn show(&self, details: bool) -> String {
        let name = match &self.parent {
            Some(parent) => format!("{}@{}", self.name, parent),
            None => self.name.clone(),
        };
        let state = if self.up { "UP" } else { "DOWN" };
        let mut out = format!(
            "7: {}: <BROADCAST,MULTICAST,{}> mtu {} qdisc noqueue state {} mode DEFAULT group default qlen 1000\n    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff promiscuity 0 minmtu 0 maxmtu 65535",
            name, state, self.mtu, state
        );
        if details {
            if let Some(id) = self.vlan_id {
                out.push_str(&format!(
                    "\n    vlan protocol 802.1Q id {} <REORDER_HDR> addrgenmode eui64 numtxqueues 1",
                    id
                ));
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct HostState {
    links: BTreeMap<String, FakeLink>,
    log: Vec<String>,
    faults: Vec<(String, ExecResult)>,
    notifier_result: Option<ExecResult>,
}

/// Emulated host network stack
#[derive(Debug, Clone, Default)]
pub struct FakeIpHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeIpHost {
    /// Create a host with the given physical devices
    pub fn with_physical<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let host = Self::default();
        for device in devices {
            host.add_link(FakeLink::physical(device));
        }
        host
    }

    /// Insert a link directly, bypassing `ip`
    pub fn add_link(&self, link: FakeLink) {
        self.state.lock().links.insert(link.name.clone(), link);
    }

    /// Look up a link
    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.state.lock().links.get(name).cloned()
    }

    /// All VLAN links stacked on `parent` with tag `vlan_id`
    pub fn vlan_links(&self, parent: &str, vlan_id: u16) -> Vec<FakeLink> {
        self.state
            .lock()
            .links
            .values()
            .filter(|l| l.parent.as_deref() == Some(parent) && l.vlan_id == Some(vlan_id))
            .cloned()
            .collect()
    }

    /// Fail the next command containing `pattern` with `result`
    pub fn fail_next(&self, pattern: impl Into<String>, result: ExecResult) {
        self.state.lock().faults.push((pattern.into(), result));
    }

    /// Answer every notifier invocation with `result`
    pub fn set_notifier_result(&self, result: ExecResult) {
        self.state.lock().notifier_result = Some(result);
    }

    /// All commands received so far, in call order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn execute(&self, cmd: &str) -> ExecResult {
        let mut state = self.state.lock();
        state.log.push(cmd.to_string());

        if let Some(i) = state.faults.iter().position(|(p, _)| cmd.contains(p.as_str())) {
            return state.faults.remove(i).1;
        }

        let tokens: Vec<String> = cmd
            .split_whitespace()
            .map(|t| t.trim_matches('"').to_string())
            .collect();
        let Some((program, args)) = tokens.split_first() else {
            return ExecResult::failed(127, "empty command");
        };

        if !program.rsplit('/').next().is_some_and(|base| base == "ip") {
            return state.notifier_result.clone().unwrap_or_default();
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["-d", "link", "show", name] => show(&state, name, true),
            ["link", "show", name] => show(&state, name, false),
            ["link", "set", name, "up"] => match state.links.get_mut(*name) {
                Some(link) => {
                    link.up = true;
                    ExecResult::ok("")
                }
                None => cannot_find(name),
            },
            ["link", "delete", name] => match state.links.remove(*name) {
                Some(_) => ExecResult::ok(""),
                None => cannot_find(name),
            },
            ["link", "add", "link", parent, "name", name, "mtu", mtu, "type", "vlan", "id", id, rest @ ..] => {
                if !state.links.contains_key(*parent) {
                    return cannot_find(parent);
                }
                let (Ok(mtu), Ok(id)) = (mtu.parse::<u32>(), id.parse::<u16>()) else {
                    return ExecResult::failed(255, "Error: argument is wrong");
                };
                // The kernel allows one device per (lower device, tag) pair.
                let tag_taken = state
                    .links
                    .values()
                    .any(|l| l.parent.as_deref() == Some(*parent) && l.vlan_id == Some(id));
                if tag_taken || state.links.contains_key(*name) {
                    return ExecResult::failed(2, "RTNETLINK answers: File exists");
                }
                let mut link = FakeLink::vlan(*name, *parent, id);
                link.mtu = mtu;
                link.options = rest.iter().map(|s| s.to_string()).collect();
                state.links.insert(name.to_string(), link);
                ExecResult::ok("")
            }
            _ => ExecResult::failed(255, format!("Command \"{}\" is unknown", cmd)),
        }
    }
}

fn show(state: &HostState, name: &str, details: bool) -> ExecResult {
    match state.links.get(name) {
        Some(link) => ExecResult::ok(link.show(details)),
        None => ExecResult::failed(1, format!("Device \"{}\" does not exist.", name)),
    }
}

fn cannot_find(name: &str) -> ExecResult {
    ExecResult::failed(1, format!("Cannot find device \"{}\"", name))
}

#[async_trait]
impl CommandRunner for FakeIpHost {
    async fn run(&self, cmd: &str) -> VlanTagResult<ExecResult> {
        Ok(self.execute(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_show_vlan() {
        let host = FakeIpHost::with_physical(["eth0"]);
        let added = host
            .run("/sbin/ip link add link \"eth0\" name \"eth0.7\" mtu 1500 type vlan id 7 gvrp on")
            .await
            .unwrap();
        assert!(added.success());

        let shown = host.run("/sbin/ip -d link show \"eth0.7\"").await.unwrap();
        assert!(shown.stdout.contains("vlan protocol 802.1Q id 7"));
        assert_eq!(host.link("eth0.7").unwrap().options, vec!["gvrp", "on"]);
    }

    #[tokio::test]
    async fn test_duplicate_add_fails() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.7", "eth0", 7));
        let result = host
            .run("/sbin/ip link add link eth0 name eth0.7 mtu 1500 type vlan id 7")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(result.stderr.contains("File exists"));
    }

    #[tokio::test]
    async fn test_same_tag_under_other_name_fails() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.7", "eth0", 7));
        let result = host
            .run("/sbin/ip link add link eth0 name vlan7 mtu 1500 type vlan id 7")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(result.stderr.contains("File exists"));
        assert!(host.link("vlan7").is_none());
        assert_eq!(host.vlan_links("eth0", 7).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_device() {
        let host = FakeIpHost::default();
        assert_eq!(host.run("/sbin/ip -d link show eth9").await.unwrap().exit_code, 1);
        assert_eq!(host.run("/sbin/ip link delete eth9").await.unwrap().exit_code, 1);
    }

    #[tokio::test]
    async fn test_notifier_passthrough() {
        let host = FakeIpHost::default();
        host.set_notifier_result(ExecResult::failed(1, "switch unreachable"));
        let result = host.run("\"/opt/fabric\" pre 7 \"node1\"").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(host.commands().len(), 1);
    }
}
