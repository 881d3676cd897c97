//! Controller configuration.

use std::time::Duration;

use fleetgrid_policy::BidConfig;

/// Tunables for the provisioning loop.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Pause between iterations.
    pub iteration_interval: Duration,
    /// Regions bids may target. Usually the same set the resource
    /// manager polls.
    pub allowed_regions: Vec<String>,
    /// Pricing and safety-factor knobs for bid computation.
    pub bid: BidConfig,
    /// Hard cap on bids submitted in one iteration.
    pub max_bids_per_iteration: usize,
    /// Pause after each successful submission.
    pub bid_submit_delay: Duration,
    /// Backoff before retrying after a failed submission.
    pub bid_failure_backoff: Duration,
    /// Lifetime of the secret record created per bid.
    pub secret_expiry: Duration,
    /// Bias tables older than this (seconds) are ignored.
    pub max_bias_age: u64,
    /// Weight of the kill rate when biasing comparison prices.
    pub kill_rate_multiplier: f64,
    /// Consecutive failed iterations tolerated before giving up.
    pub max_consecutive_failures: u32,
    /// The watchdog fires if no iteration reaches the submission phase
    /// within this window. Must exceed the iteration interval plus the
    /// manager's fetch timeout.
    pub watchdog_timeout: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            iteration_interval: Duration::from_secs(60),
            allowed_regions: vec![],
            bid: BidConfig::default(),
            max_bids_per_iteration: 30,
            bid_submit_delay: Duration::from_millis(500),
            bid_failure_backoff: Duration::from_secs(5),
            secret_expiry: Duration::from_secs(30 * 60),
            max_bias_age: 20 * 60,
            kill_rate_multiplier: 1.0,
            max_consecutive_failures: 15,
            watchdog_timeout: Duration::from_secs(10 * 60),
        }
    }
}
