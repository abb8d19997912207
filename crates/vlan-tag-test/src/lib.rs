//! Test infrastructure for the VLAN tagging driver
//!
//! Provides:
//! - An in-memory emulation of the host's `ip` link table
//! - A scripted runner that records every command it is given
//! - Verification helpers for command logs

mod fake_host;
mod runner;
mod verification;

pub use fake_host::{FakeIpHost, FakeLink};
pub use runner::RecordingRunner;
pub use verification::*;
