//! vlan-tag-driver - 802.1Q tagged interfaces for virtual machine NICs
//!
//! Creates and removes VLAN sub-interfaces on a shared physical device when
//! VMs start and stop, serializing work per physical device and informing
//! an external fabric controller about VLAN usage.

mod binder;
mod commands;
mod lock;
mod notifier;
mod state;
mod types;
mod vlan_tag_mgr;

pub use binder::*;
pub use commands::*;
pub use lock::{DeviceLockGuard, LockRegistry};
pub use notifier::*;
pub use state::*;
pub use types::*;
pub use vlan_tag_mgr::VlanTagMgr;
