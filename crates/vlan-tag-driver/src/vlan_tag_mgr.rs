//! VlanTagMgr - lifecycle of 802.1Q tagged interfaces for VM NICs
//!
//! Operation flow for one NIC:
//! 1. activate → lock physical device → ensure bound → inspect → create → notify `pre`
//! 2. deactivate → lock physical device → delete → notify `clean`
//!
//! Both directions are safe to repeat. Neither is transactional: a failure
//! after the device mutation leaves the device as the last successful step
//! left it, and the error is returned to the caller.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use vlan_tag_common::{CommandRunner, HostConfig, LinkOptions, VlanTagError, VlanTagResult};

use crate::binder::{LinkPresenceBinder, PhysicalDeviceBinder};
use crate::commands::{build_add_vlan_cmd, build_delete_link_cmd, build_set_link_up_cmd};
use crate::lock::{DeviceLockGuard, LockRegistry};
use crate::notifier::{DisabledNotifier, FabricNotifier, ScriptNotifier};
use crate::state::VlanStateQuery;
use crate::types::{HostContext, LinkState, NicConfig, NotifyAction};

/// Manages tagged interfaces on one host
pub struct VlanTagMgr {
    /// Host-wide configuration
    config: HostConfig,
    /// Executes device commands
    runner: Arc<dyn CommandRunner>,
    /// Reads live device state
    state: VlanStateQuery,
    /// External fabric hook
    notifier: Arc<dyn FabricNotifier>,
    /// Physical device preparation
    binder: Arc<dyn PhysicalDeviceBinder>,
    /// Process-wide per-device locks
    locks: Arc<LockRegistry>,
}

impl VlanTagMgr {
    /// Creates a manager wired from host configuration
    ///
    /// The notifier is the configured script, or a no-op when none is set.
    /// The binder verifies that the physical device exists.
    pub fn new(config: HostConfig, runner: Arc<dyn CommandRunner>, locks: Arc<LockRegistry>) -> Self {
        let notifier: Arc<dyn FabricNotifier> = match &config.fabric_notifier {
            Some(path) => Arc::new(ScriptNotifier::new(runner.clone(), path.clone())),
            None => Arc::new(DisabledNotifier),
        };
        let binder = Arc::new(LinkPresenceBinder::new(runner.clone(), config.ip_command.clone()));
        let state = VlanStateQuery::new(runner.clone(), config.ip_command.clone());

        Self {
            config,
            runner,
            state,
            notifier,
            binder,
            locks,
        }
    }

    /// Replaces the fabric notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn FabricNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the physical device binder
    pub fn with_binder(mut self, binder: Arc<dyn PhysicalDeviceBinder>) -> Self {
        self.binder = binder;
        self
    }

    /// State query sharing this manager's runner
    pub fn state_query(&self) -> &VlanStateQuery {
        &self.state
    }

    /// MTU for a NIC: its own, else the host default
    pub fn effective_mtu(&self, nic: &NicConfig) -> u32 {
        nic.mtu.unwrap_or(self.config.vlan_mtu)
    }

    /// Link options for a NIC layered over the host defaults
    pub fn effective_link_options(&self, nic: &NicConfig) -> LinkOptions {
        nic.link_options.merged_over(&self.config.ip_link_conf)
    }

    async fn lock(&self, nic: &NicConfig, ctx: &HostContext) -> VlanTagResult<Option<DeviceLockGuard>> {
        if !ctx.locking {
            debug!(device = %nic.physical_device, "Locking disabled");
            return Ok(None);
        }
        self.locks.acquire(&nic.physical_device).await.map(Some)
    }

    /// Bring up the tagged interface for a NIC
    ///
    /// An existing device carrying the requested tag is left alone; one
    /// carrying another tag (or none) is reported as [`VlanTagError::VlanMismatch`].
    #[instrument(skip(self, nic, ctx), fields(device = %nic.tagged_device_name, vlan_id = nic.vlan_id))]
    pub async fn activate(&self, nic: &NicConfig, ctx: &HostContext) -> VlanTagResult<()> {
        nic.validate()?;
        let _guard = self.lock(nic, ctx).await?;

        self.binder.ensure_bound(&nic.physical_device).await?;

        match self.state.inspect(&nic.tagged_device_name).await? {
            LinkState::Absent => self.create_vlan_dev(nic, ctx).await,
            LinkState::Vlan(id) if id == nic.vlan_id => {
                info!("Tagged device already present, skipping creation");
                self.notifier
                    .notify(NotifyAction::Pre, nic.vlan_id, &ctx.host)
                    .await
            }
            other => Err(mismatch(nic, other)),
        }
    }

    /// Tear down the tagged interface for a NIC
    #[instrument(skip(self, nic, ctx), fields(device = %nic.tagged_device_name, vlan_id = nic.vlan_id))]
    pub async fn deactivate(&self, nic: &NicConfig, ctx: &HostContext) -> VlanTagResult<()> {
        nic.validate()?;
        let _guard = self.lock(nic, ctx).await?;

        self.delete_vlan_dev(nic, ctx).await
    }

    /// Create the tagged device, bring it up and notify the fabric
    ///
    /// Callers hold the device lock. If creation fails because the name is
    /// taken, the device is inspected: a matching tag counts as success. If
    /// the name is free, the tag is held by another device on the same
    /// physical device and [`VlanTagError::VlanInUse`] is returned.
    #[instrument(skip(self, nic, ctx), fields(device = %nic.tagged_device_name, vlan_id = nic.vlan_id))]
    pub async fn create_vlan_dev(&self, nic: &NicConfig, ctx: &HostContext) -> VlanTagResult<()> {
        let mtu = self.effective_mtu(nic);
        let options = self.effective_link_options(nic);
        let ip_cmd = &self.config.ip_command;

        let add_cmd = build_add_vlan_cmd(ip_cmd, nic, mtu, &options);
        match self.runner.run_mutation(&add_cmd).await {
            Ok(_) => info!(mtu = mtu, "Created tagged device"),
            Err(e) if e.is_device_exists() => {
                match self.state.inspect(&nic.tagged_device_name).await? {
                    LinkState::Vlan(id) if id == nic.vlan_id => {
                        info!("Tagged device already exists with the requested VLAN");
                    }
                    // The name is free, so another device holds this tag.
                    LinkState::Absent => return Err(vlan_in_use(nic, &add_cmd, e)),
                    other => return Err(mismatch(nic, other)),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to create tagged device");
                return Err(e);
            }
        }

        let up_cmd = build_set_link_up_cmd(ip_cmd, &nic.tagged_device_name);
        self.runner.run_mutation(&up_cmd).await.map_err(|e| {
            warn!(error = %e, "Failed to bring tagged device up");
            e
        })?;

        self.notifier
            .notify(NotifyAction::Pre, nic.vlan_id, &ctx.host)
            .await
    }

    /// Delete the tagged device and notify the fabric
    ///
    /// The physical device itself is never deleted. An already absent
    /// device counts as deleted. A failed delete skips the notification.
    #[instrument(skip(self, nic, ctx), fields(device = %nic.tagged_device_name, vlan_id = nic.vlan_id))]
    pub async fn delete_vlan_dev(&self, nic: &NicConfig, ctx: &HostContext) -> VlanTagResult<()> {
        if nic.targets_physical_device() {
            info!("Tagged device is the physical device, not deleting");
        } else {
            let del_cmd = build_delete_link_cmd(&self.config.ip_command, &nic.tagged_device_name);
            match self.runner.run_mutation(&del_cmd).await {
                Ok(_) => info!("Deleted tagged device"),
                Err(e) if e.is_device_absent() => info!("Tagged device already absent"),
                Err(e) => {
                    warn!(error = %e, "Failed to delete tagged device, checking state");
                    if self.state.inspect(&nic.tagged_device_name).await? != LinkState::Absent {
                        return Err(e);
                    }
                    info!("Tagged device gone despite delete failure");
                }
            }
        }

        self.notifier
            .notify(NotifyAction::Clean, nic.vlan_id, &ctx.host)
            .await
    }
}

fn mismatch(nic: &NicConfig, found: LinkState) -> VlanTagError {
    VlanTagError::VlanMismatch {
        device: nic.tagged_device_name.clone(),
        expected: nic.vlan_id,
        actual: found.vlan_id(),
    }
}

fn vlan_in_use(nic: &NicConfig, command: &str, err: VlanTagError) -> VlanTagError {
    let output = match err {
        VlanTagError::DeviceMutation { output, .. } => output,
        other => other.to_string(),
    };
    VlanTagError::VlanInUse {
        physical_device: nic.physical_device.clone(),
        vlan_id: nic.vlan_id,
        device: nic.tagged_device_name.clone(),
        command: command.to_string(),
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vlan_tag_common::{ExecResult, LinkOptionValue};
    use vlan_tag_test::{CommandLog, FakeIpHost, FakeLink, RecordingRunner};

    fn host_config() -> HostConfig {
        HostConfig {
            fabric_notifier: Some(PathBuf::from("/opt/vnm/fabric-notify")),
            lock_dir: None,
            ..HostConfig::default()
        }
    }

    fn mgr(runner: Arc<dyn CommandRunner>) -> VlanTagMgr {
        VlanTagMgr::new(host_config(), runner, Arc::new(LockRegistry::new()))
    }

    fn ctx() -> HostContext {
        HostContext::new("node1")
    }

    #[test]
    fn test_effective_mtu() {
        let mgr = mgr(Arc::new(RecordingRunner::new()));
        assert_eq!(mgr.effective_mtu(&NicConfig::new("eth0", 100)), 1500);
        assert_eq!(mgr.effective_mtu(&NicConfig::new("eth0", 100).with_mtu(1400)), 1400);
    }

    #[test]
    fn test_effective_link_options() {
        let config = HostConfig {
            ip_link_conf: LinkOptions::new().with("reorder_hdr", LinkOptionValue::Flag(true)),
            ..host_config()
        };
        let mgr = VlanTagMgr::new(
            config,
            Arc::new(RecordingRunner::new()),
            Arc::new(LockRegistry::new()),
        );
        let nic = NicConfig::new("eth0", 100)
            .with_link_option("reorder_hdr", LinkOptionValue::Flag(false))
            .with_link_option("gvrp", LinkOptionValue::Flag(true));

        let options = mgr.effective_link_options(&nic);
        assert_eq!(options.get("reorder_hdr"), Some(&LinkOptionValue::Flag(false)));
        assert_eq!(options.get("gvrp"), Some(&LinkOptionValue::Flag(true)));
    }

    #[tokio::test]
    async fn test_create_vlan_dev_commands() {
        let runner = RecordingRunner::new();
        let mgr = mgr(Arc::new(runner.clone()));

        mgr.create_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "/sbin/ip link add link eth0 name eth0.100 mtu 1500 type vlan id 100",
                "/sbin/ip link set eth0.100 up",
                "/opt/vnm/fabric-notify pre 100 node1",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_vlan_dev_fails_on_other_error() {
        let runner = RecordingRunner::new();
        runner.respond(
            "link add",
            ExecResult::failed(2, "RTNETLINK answers: Operation not permitted"),
        );
        let mgr = mgr(Arc::new(runner.clone()));

        let err = mgr
            .create_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VlanTagError::DeviceMutation { exit_code: 2, .. }));

        let log = CommandLog::new(runner.commands());
        log.assert_not_issued("link set").unwrap();
        log.assert_not_issued("fabric-notify").unwrap();
    }

    #[tokio::test]
    async fn test_create_vlan_dev_existing_same_vlan() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.100", "eth0", 100));
        let mgr = mgr(Arc::new(host.clone()));

        mgr.create_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();

        assert_eq!(host.vlan_links("eth0", 100).len(), 1);
        assert!(host.link("eth0.100").unwrap().up);
    }

    #[tokio::test]
    async fn test_create_vlan_dev_existing_other_vlan() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.100", "eth0", 200));
        let mgr = mgr(Arc::new(host.clone()));

        let err = mgr
            .create_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap_err();
        match err {
            VlanTagError::VlanMismatch {
                device,
                expected,
                actual,
            } => {
                assert_eq!(device, "eth0.100");
                assert_eq!(expected, 100);
                assert_eq!(actual, Some(200));
            }
            other => panic!("Expected VlanMismatch error, got {:?}", other),
        }
        CommandLog::new(host.commands())
            .assert_not_issued("fabric-notify")
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_vlan_dev_tag_held_by_other_name() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.100", "eth0", 100));
        let mgr = mgr(Arc::new(host.clone()));
        let nic = NicConfig::new("eth0", 100).with_name("vlan100");

        let err = mgr.create_vlan_dev(&nic, &ctx()).await.unwrap_err();
        match err {
            VlanTagError::VlanInUse {
                physical_device,
                vlan_id,
                device,
                output,
                ..
            } => {
                assert_eq!(physical_device, "eth0");
                assert_eq!(vlan_id, 100);
                assert_eq!(device, "vlan100");
                assert!(output.contains("File exists"));
            }
            other => panic!("Expected VlanInUse error, got {:?}", other),
        }
        assert!(host.link("vlan100").is_none());
        CommandLog::new(host.commands())
            .assert_not_issued("fabric-notify")
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_absent_device_skips_requery() {
        let runner = RecordingRunner::new();
        runner.respond(
            "link delete",
            ExecResult::failed(1, "Cannot find device \"eth0.100\""),
        );
        let mgr = mgr(Arc::new(runner.clone()));

        mgr.delete_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "/sbin/ip link delete eth0.100",
                "/opt/vnm/fabric-notify clean 100 node1",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_then_query_failure() {
        let runner = RecordingRunner::new();
        runner.respond(
            "link delete",
            ExecResult::failed(2, "RTNETLINK answers: Operation not permitted"),
        );
        runner.respond("-d link show", ExecResult::failed(127, "sh: /sbin/ip: not found"));
        let mgr = mgr(Arc::new(runner.clone()));

        let err = mgr
            .delete_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VlanTagError::DeviceQuery { exit_code: 127, .. }));
        CommandLog::new(runner.commands())
            .assert_not_issued("fabric-notify")
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_failure_but_device_gone() {
        let runner = RecordingRunner::new();
        runner.respond("link delete", ExecResult::failed(2, "RTNETLINK answers: Busy"));
        runner.respond("-d link show", ExecResult::failed(1, "Device \"eth0.100\" does not exist."));
        let mgr = mgr(Arc::new(runner.clone()));

        mgr.delete_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();
        CommandLog::new(runner.commands())
            .assert_issued("fabric-notify clean 100 node1")
            .unwrap();
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PhysicalDeviceBinder for RecordingHooks {
        async fn ensure_bound(&self, physical_device: &str) -> VlanTagResult<()> {
            self.calls.lock().push(format!("bind {}", physical_device));
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl FabricNotifier for RecordingHooks {
        async fn notify(&self, action: NotifyAction, vlan_id: u16, host: &str) -> VlanTagResult<()> {
            self.calls.lock().push(format!("{} {} {}", action, vlan_id, host));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_custom_binder_and_notifier() {
        let host = FakeIpHost::default();
        let hooks = Arc::new(RecordingHooks::default());
        let mgr = mgr(Arc::new(host.clone()))
            .with_binder(hooks.clone())
            .with_notifier(hooks.clone());

        host.add_link(FakeLink::physical("eth0"));
        mgr.activate(&NicConfig::new("eth0", 100), &ctx()).await.unwrap();
        mgr.deactivate(&NicConfig::new("eth0", 100), &ctx()).await.unwrap();

        assert_eq!(
            *hooks.calls.lock(),
            vec!["bind eth0", "pre 100 node1", "clean 100 node1"]
        );
        let log = CommandLog::new(host.commands());
        log.assert_not_issued("/sbin/ip link show eth0").unwrap();
        log.assert_not_issued("fabric-notify").unwrap();
    }

    #[tokio::test]
    async fn test_delete_protects_physical_device() {
        let runner = RecordingRunner::new();
        let mgr = mgr(Arc::new(runner.clone()));
        let nic = NicConfig::new("eth0", 100).with_name("eth0");

        mgr.delete_vlan_dev(&nic, &ctx()).await.unwrap();

        assert_eq!(runner.commands(), vec!["/opt/vnm/fabric-notify clean 100 node1"]);
    }

    #[tokio::test]
    async fn test_delete_absent_device_succeeds() {
        let host = FakeIpHost::with_physical(["eth0"]);
        let mgr = mgr(Arc::new(host.clone()));

        mgr.delete_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();

        let log = CommandLog::new(host.commands());
        log.assert_issued("/sbin/ip link delete eth0.100").unwrap();
        log.assert_issued("/opt/vnm/fabric-notify clean 100 node1").unwrap();
    }

    #[tokio::test]
    async fn test_delete_failure_on_present_device() {
        let host = FakeIpHost::with_physical(["eth0"]);
        host.add_link(FakeLink::vlan("eth0.100", "eth0", 100));
        host.fail_next(
            "link delete",
            ExecResult::failed(2, "RTNETLINK answers: Operation not permitted"),
        );
        let mgr = mgr(Arc::new(host.clone()));

        let err = mgr
            .delete_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VlanTagError::DeviceMutation { .. }));
        assert!(host.link("eth0.100").is_some());
        CommandLog::new(host.commands())
            .assert_not_issued("fabric-notify")
            .unwrap();
    }

    #[tokio::test]
    async fn test_activate_rejects_invalid_nic() {
        let runner = RecordingRunner::new();
        let mgr = mgr(Arc::new(runner.clone()));

        let err = mgr
            .activate(&NicConfig::new("eth0", 5000), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VlanTagError::InvalidConfig { .. }));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_activate_untagged_device_is_mismatch() {
        let host = FakeIpHost::with_physical(["eth0", "eth1"]);
        let mgr = mgr(Arc::new(host.clone()));
        let nic = NicConfig::new("eth0", 100).with_name("eth1");

        let err = mgr.activate(&nic, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            VlanTagError::VlanMismatch { actual: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_activate_missing_physical_device() {
        let host = FakeIpHost::default();
        let mgr = mgr(Arc::new(host.clone()));

        let err = mgr
            .activate(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VlanTagError::PhysicalDevice { .. }));
        CommandLog::new(host.commands())
            .assert_not_issued("link add")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_notifier_when_unconfigured() {
        let runner = RecordingRunner::new();
        let config = HostConfig {
            lock_dir: None,
            ..HostConfig::default()
        };
        let mgr = VlanTagMgr::new(config, Arc::new(runner.clone()), Arc::new(LockRegistry::new()));

        mgr.create_vlan_dev(&NicConfig::new("eth0", 100), &ctx())
            .await
            .unwrap();
        assert_eq!(runner.commands().len(), 2);
    }
}
