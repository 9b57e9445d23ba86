//! Thin process wrapper around [`eos_mgm_core::MgmRuntime`]: parses
//! arguments, installs structured logging, loads the configuration
//! file, brings the runtime up, and waits for a shutdown signal.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eos_mgm_core::config::Config;
use eos_mgm_core::{MgmRuntime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mgmd", about = "EOS metadata-server core daemon")]
struct Args {
    /// TOML configuration document (spec §6).
    #[arg(long, default_value = "/etc/eos/mgm.toml")]
    config: PathBuf,

    /// Container change-log path.
    #[arg(long, default_value = "/var/eos/md/directories.mdlog")]
    container_log: PathBuf,

    /// File change-log path.
    #[arg(long, default_value = "/var/eos/md/files.mdlog")]
    file_log: PathBuf,

    /// This manager's own `host:port`, embedded in minted capabilities.
    #[arg(long)]
    manager_identity: String,

    /// Starts as a replication slave tailing a master's change logs at
    /// `container_log,file_log` (spec §4.10).
    #[arg(long, value_parser = parse_replica_pair)]
    replicate_from: Option<(PathBuf, PathBuf)>,

    #[arg(long, default_value_t = 300)]
    capability_validity_secs: u64,

    #[arg(long, default_value_t = 30)]
    max_heartbeat_age_secs: u64,

    #[arg(long, default_value_t = 4096)]
    transfer_queue_capacity: usize,

    #[arg(long, default_value_t = 5)]
    engine_tick_secs: u64,

    #[arg(long, default_value_t = 0.05)]
    default_balance_threshold: f64,

    /// Auto-repair fsck findings the repair engine knows how to fix.
    #[arg(long, default_value_t = false)]
    fsck_repair: bool,
}

fn parse_replica_pair(raw: &str) -> Result<(PathBuf, PathBuf), String> {
    let (container, file) = raw
        .split_once(',')
        .ok_or_else(|| "expected `<container-log>,<file-log>`".to_string())?;
    Ok((PathBuf::from(container), PathBuf::from(file)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let runtime = MgmRuntime::init(RuntimeConfig {
        config,
        container_log_path: args.container_log,
        file_log_path: args.file_log,
        manager_identity: args.manager_identity,
        replicate_from: args.replicate_from,
        capability_validity: Duration::from_secs(args.capability_validity_secs),
        max_heartbeat_age: Duration::from_secs(args.max_heartbeat_age_secs),
        transfer_queue_capacity: args.transfer_queue_capacity,
        engine_tick_period: Duration::from_secs(args.engine_tick_secs),
        default_balance_threshold: args.default_balance_threshold,
        fsck_repair: args.fsck_repair,
    })
    .await?;

    tracing::info!("mgmd running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    runtime.shutdown().await;
    Ok(())
}
