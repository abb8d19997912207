//! Fabric notification hook
//!
//! An external executable is told when a VLAN starts or stops being used
//! on this host, so the upstream switch configuration can follow. The hook
//! is invoked positionally as `<notifier> <pre|clean> <vlan_id> <host>` and
//! is expected to be idempotent.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vlan_tag_common::{CommandRunner, VlanTagError, VlanTagResult};

use crate::commands::build_notify_cmd;
use crate::types::NotifyAction;

/// Informs the network fabric about VLAN usage on a host
#[async_trait]
pub trait FabricNotifier: Send + Sync {
    /// Announce `action` for `vlan_id` on `host`
    async fn notify(&self, action: NotifyAction, vlan_id: u16, host: &str) -> VlanTagResult<()>;
}

/// Runs an external notifier executable through a [`CommandRunner`]
pub struct ScriptNotifier {
    runner: Arc<dyn CommandRunner>,
    path: PathBuf,
}

impl ScriptNotifier {
    /// Create a notifier for the executable at `path`
    pub fn new(runner: Arc<dyn CommandRunner>, path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            path: path.into(),
        }
    }
}

#[async_trait]
impl FabricNotifier for ScriptNotifier {
    async fn notify(&self, action: NotifyAction, vlan_id: u16, host: &str) -> VlanTagResult<()> {
        let cmd = build_notify_cmd(&self.path, action, vlan_id, host);
        let result = self.runner.run(&cmd).await?;

        if !result.success() {
            warn!(
                action = %action,
                vlan_id = vlan_id,
                host = %host,
                exit_code = result.exit_code,
                output = %result.combined_output(),
                "Fabric notification failed"
            );
            return Err(VlanTagError::FabricNotification {
                action: action.to_string(),
                vlan_id,
                host: host.to_string(),
                command: cmd,
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        if !result.stdout.is_empty() {
            debug!(output = %result.stdout, "Fabric notifier output");
        }
        info!(action = %action, vlan_id = vlan_id, host = %host, "Notified fabric");
        Ok(())
    }
}

/// Notifier used when no hook is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl FabricNotifier for DisabledNotifier {
    async fn notify(&self, action: NotifyAction, vlan_id: u16, host: &str) -> VlanTagResult<()> {
        debug!(
            action = %action,
            vlan_id = vlan_id,
            host = %host,
            "Fabric notifier not configured, skipping"
        );
        Ok(())
    }
}
