//! Daemon configuration file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use fleetgrid_manager::ManagerConfig;
use fleetgrid_policy::BidConfig;
use fleetgrid_provisioner::ProvisionerConfig;

/// Everything `fleetgridd` reads from its TOML config file. Every field
/// has a default so a minimal file only names the provisioner, its key
/// prefix, and the regions to operate in.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    pub provisioner_id: String,
    /// Keypair-name prefix marking owned resources. Must be unique per
    /// provisioner instance sharing a cloud account.
    pub key_prefix: String,
    #[serde(default)]
    pub public_key: String,
    pub regions: Vec<String>,

    #[serde(default = "default_iteration_interval_secs")]
    pub iteration_interval_secs: u64,
    #[serde(default = "default_bid_safety_factor")]
    pub bid_safety_factor: f64,
    #[serde(default = "default_max_bid_price")]
    pub max_bid_price: f64,
    #[serde(default = "default_max_bids_per_iteration")]
    pub max_bids_per_iteration: usize,
    #[serde(default = "default_watchdog_timeout_secs")]
    pub watchdog_timeout_secs: u64,
    #[serde(default = "default_max_instance_life_secs")]
    pub max_instance_life_secs: u64,
    #[serde(default = "default_stalled_request_age_secs")]
    pub stalled_request_age_secs: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Fixed per-worker-type backlog used by the dev-mode static queue.
    #[serde(default)]
    pub backlog: std::collections::HashMap<String, i64>,

    /// Spot prices to seed the dev-mode in-memory cloud with.
    #[serde(default)]
    pub seed_prices: Vec<SeedPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPrice {
    pub region: String,
    pub availability_zone: String,
    pub instance_type: String,
    pub price: f64,
}

fn default_iteration_interval_secs() -> u64 {
    60
}
fn default_bid_safety_factor() -> f64 {
    1.3
}
fn default_max_bid_price() -> f64 {
    100.0
}
fn default_max_bids_per_iteration() -> usize {
    30
}
fn default_watchdog_timeout_secs() -> u64 {
    10 * 60
}
fn default_max_instance_life_secs() -> u64 {
    96 * 3600
}
fn default_stalled_request_age_secs() -> u64 {
    20 * 60
}
fn default_max_consecutive_failures() -> u32 {
    15
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            provisioner_id: self.provisioner_id.clone(),
            key_prefix: self.key_prefix.clone(),
            public_key: self.public_key.clone(),
            regions: self.regions.clone(),
            stalled_request_age: self.stalled_request_age_secs,
            max_instance_life: self.max_instance_life_secs,
            ..ManagerConfig::default()
        }
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            iteration_interval: Duration::from_secs(self.iteration_interval_secs),
            allowed_regions: self.regions.clone(),
            bid: BidConfig {
                safety_factor: self.bid_safety_factor,
                max_bid_price: self.max_bid_price,
            },
            max_bids_per_iteration: self.max_bids_per_iteration,
            max_consecutive_failures: self.max_consecutive_failures,
            watchdog_timeout: Duration::from_secs(self.watchdog_timeout_secs),
            ..ProvisionerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            provisioner_id = "prov-1"
            key_prefix = "fleetgrid:prov-1:"
            regions = ["us-west-2", "eu-central-1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.iteration_interval_secs, 60);
        assert_eq!(config.bid_safety_factor, 1.3);
        assert_eq!(config.max_bids_per_iteration, 30);
        assert_eq!(config.max_consecutive_failures, 15);
        assert_eq!(config.manager_config().regions.len(), 2);
    }

    #[test]
    fn knobs_flow_into_subsystem_configs() {
        let config: DaemonConfig = toml::from_str(
            r#"
            provisioner_id = "prov-1"
            key_prefix = "fleetgrid:prov-1:"
            regions = ["us-west-2"]
            bid_safety_factor = 1.5
            max_bid_price = 8.0
            stalled_request_age_secs = 600

            [backlog]
            builder = 4

            [[seed_prices]]
            region = "us-west-2"
            availability_zone = "us-west-2a"
            instance_type = "m5.large"
            price = 0.12
            "#,
        )
        .unwrap();

        assert_eq!(config.provisioner_config().bid.safety_factor, 1.5);
        assert_eq!(config.provisioner_config().bid.max_bid_price, 8.0);
        assert_eq!(config.manager_config().stalled_request_age, 600);
        assert_eq!(config.backlog["builder"], 4);
        assert_eq!(config.seed_prices.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<DaemonConfig>(
            r#"
            provisioner_id = "prov-1"
            key_prefix = "fleetgrid:prov-1:"
            regions = []
            iteration_interval = 60
            "#,
        );
        assert!(err.is_err());
    }
}
