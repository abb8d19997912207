//! vlan-tag-driver - entry point
//!
//! Invoked once per VM NIC by the orchestration host, with the NIC already
//! decoded into command-line arguments.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vlan_tag_common::{defaults, HostConfig, LinkOptionValue, LinkOptions, ShellRunner};
use vlan_tag_driver::{HostContext, LinkState, LockRegistry, NicConfig, VlanTagMgr};

/// Manage 802.1Q tagged interfaces for virtual machine NICs
#[derive(Debug, Parser)]
#[command(name = "vlan-tag-driver", version, about)]
struct Cli {
    /// Host configuration file
    #[arg(long, default_value = defaults::CONFIG_PATH)]
    config: PathBuf,

    /// Skip per-device locking (caller guarantees exclusive access)
    #[arg(long)]
    no_lock: bool,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the tagged interface for a NIC
    Activate(NicArgs),
    /// Remove the tagged interface for a NIC
    Deactivate(NicArgs),
    /// Print the VLAN id of a device, or "absent"
    Query {
        /// Device name
        device: String,
    },
}

#[derive(Debug, Args)]
struct NicArgs {
    /// Physical device to stack the tagged interface on
    #[arg(long)]
    phydev: String,

    /// 802.1Q VLAN id
    #[arg(long)]
    vlan_id: u16,

    /// Tagged interface name (default: <phydev>.<vlan_id>)
    #[arg(long)]
    vlan_dev: Option<String>,

    /// MTU (default: host vlan_mtu)
    #[arg(long)]
    mtu: Option<u32>,

    /// Extra link option, repeatable
    #[arg(long = "link-opt", value_name = "KEY=VALUE", value_parser = parse_link_opt)]
    link_opts: Vec<(String, LinkOptionValue)>,

    /// Host identifier passed to the fabric notifier
    #[arg(long)]
    host: String,
}

impl NicArgs {
    fn to_nic(&self) -> NicConfig {
        let mut nic = NicConfig::new(&self.phydev, self.vlan_id);
        if let Some(name) = &self.vlan_dev {
            nic = nic.with_name(name);
        }
        nic.mtu = self.mtu;
        nic.link_options = self.link_opts.iter().cloned().collect::<LinkOptions>();
        nic
    }
}

fn parse_link_opt(s: &str) -> Result<(String, LinkOptionValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty option name in '{}'", s));
    }
    Ok((key.to_string(), LinkOptionValue::parse_token(value)))
}

/// Initializes tracing/logging subsystem
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

async fn run(cli: Cli) -> Result<()> {
    let config = HostConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let locks = Arc::new(match &config.lock_dir {
        Some(dir) => LockRegistry::with_lock_dir(dir),
        None => LockRegistry::new(),
    });
    let locking = config.locking && !cli.no_lock;
    let mgr = VlanTagMgr::new(config, Arc::new(ShellRunner::new()), locks);

    match &cli.command {
        Command::Activate(args) => {
            let nic = args.to_nic();
            let ctx = context(&args.host, locking);
            mgr.activate(&nic, &ctx)
                .await
                .with_context(|| format!("activating {}", nic.tagged_device_name))?;
        }
        Command::Deactivate(args) => {
            let nic = args.to_nic();
            let ctx = context(&args.host, locking);
            mgr.deactivate(&nic, &ctx)
                .await
                .with_context(|| format!("deactivating {}", nic.tagged_device_name))?;
        }
        Command::Query { device } => {
            match mgr.state_query().inspect(device).await? {
                LinkState::Vlan(id) => println!("{}", id),
                LinkState::Untagged => println!("untagged"),
                LinkState::Absent => println!("absent"),
            }
        }
    }
    Ok(())
}

fn context(host: &str, locking: bool) -> HostContext {
    let ctx = HostContext::new(host);
    if locking {
        ctx
    } else {
        ctx.without_locking()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!(command = ?cli.command, "--- Starting vlan-tag-driver ---");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vlan-tag-driver failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
