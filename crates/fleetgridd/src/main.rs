//! fleetgridd — the FleetGrid daemon.
//!
//! Assembles the provisioning loop: resource manager over a cloud
//! backend, policy store, task queue, secret store, and the controller
//! with its watchdog and circuit breaker.
//!
//! # Usage
//!
//! ```text
//! fleetgridd dev --config fleetgrid.toml --policy-dir ./policies
//! ```
//!
//! Dev mode runs the complete loop against an in-memory cloud seeded
//! from the config file. Production cloud backends plug in through the
//! same `CloudCompute` trait.

mod config;
mod dev;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleetgrid_cloud::{InMemoryCloud, PricePoint};
use fleetgrid_manager::ResourceManager;
use fleetgrid_provisioner::Provisioner;

use crate::config::DaemonConfig;
use crate::dev::{DirPolicyStore, LogSecretStore, StaticQueue};

#[derive(Parser)]
#[command(name = "fleetgridd", about = "FleetGrid spot provisioner daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run against an in-memory cloud with file-backed policies.
    Dev {
        /// Path to the TOML config file.
        #[arg(long, default_value = "fleetgrid.toml")]
        config: PathBuf,

        /// Directory of policy JSON records.
        #[arg(long, default_value = "policies")]
        policy_dir: PathBuf,

        /// Override the iteration interval in seconds.
        #[arg(long)]
        iteration_interval: Option<u64>,

        /// Override the regions to operate in.
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetgridd=debug,fleetgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Dev {
            config,
            policy_dir,
            iteration_interval,
            regions,
        } => run_dev(config, policy_dir, iteration_interval, regions).await,
    }
}

async fn run_dev(
    config_path: PathBuf,
    policy_dir: PathBuf,
    iteration_interval: Option<u64>,
    regions: Option<Vec<String>>,
) -> anyhow::Result<()> {
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(secs) = iteration_interval {
        config.iteration_interval_secs = secs;
    }
    if let Some(regions) = regions {
        config.regions = regions;
    }
    info!(
        provisioner_id = %config.provisioner_id,
        regions = ?config.regions,
        "FleetGrid daemon starting in dev mode"
    );

    // ── Assemble the loop ──────────────────────────────────────

    let region_names: Vec<&str> = config.regions.iter().map(String::as_str).collect();
    let cloud = Arc::new(InMemoryCloud::new(&region_names));
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    cloud.set_clock(now);
    for seed in &config.seed_prices {
        cloud.add_price(
            &seed.region,
            PricePoint {
                instance_type: seed.instance_type.clone(),
                availability_zone: seed.availability_zone.clone(),
                price: seed.price,
                timestamp: now,
            },
        );
    }
    info!(prices = config.seed_prices.len(), "in-memory cloud seeded");

    let manager = ResourceManager::new(cloud, config.manager_config());
    let policy_store = Arc::new(DirPolicyStore::new(policy_dir));
    let queue = Arc::new(StaticQueue::new(config.backlog.clone()));
    let secret_store = Arc::new(LogSecretStore);
    let provisioner = Provisioner::new(
        manager,
        policy_store,
        queue,
        secret_store,
        config.provisioner_config(),
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    provisioner.run(shutdown_rx).await?;
    info!("FleetGrid daemon stopped");
    Ok(())
}
