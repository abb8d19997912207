//! Physical device preparation
//!
//! Bridge creation and uplink binding belong to the bridge-management
//! component. The lifecycle manager only needs the guarantee that the
//! physical device is ready before a tagged device is stacked on it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use vlan_tag_common::{CommandRunner, VlanTagError, VlanTagResult};

use crate::commands::build_show_link_cmd;

/// Makes sure a physical device is ready to carry tagged sub-interfaces
#[async_trait]
pub trait PhysicalDeviceBinder: Send + Sync {
    /// Ensure `physical_device` is present and bound
    async fn ensure_bound(&self, physical_device: &str) -> VlanTagResult<()>;
}

/// Binder that only verifies the physical device exists
pub struct LinkPresenceBinder {
    runner: Arc<dyn CommandRunner>,
    ip_cmd: String,
}

impl LinkPresenceBinder {
    /// Create a binder using the given runner and `ip` path
    pub fn new(runner: Arc<dyn CommandRunner>, ip_cmd: impl Into<String>) -> Self {
        Self {
            runner,
            ip_cmd: ip_cmd.into(),
        }
    }
}

#[async_trait]
impl PhysicalDeviceBinder for LinkPresenceBinder {
    async fn ensure_bound(&self, physical_device: &str) -> VlanTagResult<()> {
        let cmd = build_show_link_cmd(&self.ip_cmd, physical_device);
        let result = self.runner.run(&cmd).await?;
        if !result.success() {
            return Err(VlanTagError::physical_device(
                physical_device,
                format!(
                    "'{}' failed (exit code {}): {}",
                    cmd,
                    result.exit_code,
                    result.combined_output()
                ),
            ));
        }
        debug!(device = %physical_device, "Physical device present");
        Ok(())
    }
}
