//! Shared infrastructure for the 802.1Q VLAN tagging driver.
//!
//! - [`shell`]: command execution boundary and shell quoting
//! - [`config`]: host-wide configuration and link option handling
//! - [`error`]: error taxonomy for lifecycle operations

pub mod config;
pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use config::{defaults, HostConfig, LinkOptionValue, LinkOptions};
pub use error::{VlanTagError, VlanTagResult};
pub use shell::{shellarg, shellquote, CommandRunner, ExecResult, ShellRunner, IP_CMD};
