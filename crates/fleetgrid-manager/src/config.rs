//! Resource manager configuration.

use std::time::Duration;

/// Tunables for the reconciliation engine and housekeeping.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identifier of this provisioner; injected into worker user data and
    /// ownership tags.
    pub provisioner_id: String,
    /// Keypair-name prefix marking resources owned by this provisioner,
    /// e.g. `fleetgrid:prov-1:`. Resources without it are never touched.
    pub key_prefix: String,
    /// Public key material imported as the per-worker-type keypair.
    pub public_key: String,
    /// Regions to poll and provision in.
    pub regions: Vec<String>,
    /// Global timeout over the whole per-region fetch fan-out.
    pub fetch_timeout: Duration,
    /// Unfulfilled requests older than this (seconds) are stalled.
    pub stalled_request_age: u64,
    /// Internally tracked bids unresolved after this (seconds) are dropped
    /// and reported as never having appeared in the API.
    pub internal_state_timeout: u64,
    /// Awaiting-queue entries are evicted after this many iterations.
    pub max_resolution_iterations: u32,
    /// Trailing window (seconds) for the pricing table.
    pub pricing_window: u64,
    /// Instances strictly older than this (seconds) are zombies.
    pub max_instance_life: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            provisioner_id: "fleetgrid".to_string(),
            key_prefix: "fleetgrid:fleetgrid:".to_string(),
            public_key: String::new(),
            regions: vec![],
            fetch_timeout: Duration::from_secs(240),
            stalled_request_age: 20 * 60,
            internal_state_timeout: 15 * 60,
            max_resolution_iterations: 20,
            pricing_window: 30 * 60,
            max_instance_life: 96 * 3600,
        }
    }
}
