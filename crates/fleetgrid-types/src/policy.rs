//! Worker type policies and the bids derived from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cloud region name (e.g. "us-west-2").
pub type Region = String;

/// Availability zone name (e.g. "us-west-2a").
pub type Zone = String;

/// Instance type name (e.g. "c5.xlarge").
pub type InstanceType = String;

/// region → instance type → zone → maximum observed price over the
/// trailing pricing window.
pub type PricingTable = HashMap<Region, HashMap<InstanceType, HashMap<Zone, f64>>>;

/// JSON object used for launch-spec and user-data template layers.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

// ── Worker type policy ─────────────────────────────────────────────

/// A named class of compute demand: capacity bounds, pricing limits, and
/// layered launch configuration.
///
/// Owned by the external policy store and loaded read-only each iteration.
/// The core never mutates a policy; it only derives an observed-state
/// snapshot from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerTypePolicy {
    pub worker_type: String,
    /// Lower bound on total capacity units (running + pending + requested).
    pub min_capacity: i64,
    /// Upper bound on total capacity units.
    pub max_capacity: i64,
    /// Desired pending/running capacity ratio.
    pub scaling_ratio: f64,
    /// Floor for the comparison price of any bid.
    pub min_price: f64,
    /// Ceiling for the comparison price of any bid.
    pub max_price: f64,
    /// Instance types this worker type may run on.
    pub instance_types: Vec<InstanceTypeSpec>,
    /// Regions this worker type may run in.
    pub regions: Vec<RegionSpec>,
    /// Optional per-zone restrictions and overrides. Empty means all zones
    /// of an allowed region are eligible.
    #[serde(default)]
    pub availability_zones: Vec<AvailabilityZoneSpec>,
    /// Base launch-spec template, overridden per region/zone/type.
    #[serde(default)]
    pub launch_spec: JsonObject,
    /// Base user-data template, overridden per region/zone/type.
    #[serde(default)]
    pub user_data: JsonObject,
    /// Static secrets handed to each worker via the secret store.
    #[serde(default)]
    pub secrets: serde_json::Value,
    /// Scopes granted to each worker's credentials.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Unix timestamp (seconds) of the last policy modification.
    pub last_modified: u64,
}

/// One instance type a worker type may run on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceTypeSpec {
    pub instance_type: InstanceType,
    /// Capacity units (concurrent tasks) one instance of this type services.
    pub capacity: u32,
    /// Relative performance factor used to normalize prices across types.
    pub utility: f64,
    /// Launch-spec keys that apply only when this type is chosen.
    #[serde(default)]
    pub launch_spec: JsonObject,
    /// User-data keys that apply only when this type is chosen.
    #[serde(default)]
    pub user_data: JsonObject,
}

/// One region a worker type may run in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionSpec {
    pub region: Region,
    /// Launch-spec keys that apply only in this region (e.g. the image id).
    #[serde(default)]
    pub launch_spec: JsonObject,
    #[serde(default)]
    pub user_data: JsonObject,
}

/// A zone restriction within a region, with optional overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityZoneSpec {
    pub region: Region,
    pub availability_zone: Zone,
    #[serde(default)]
    pub launch_spec: JsonObject,
    #[serde(default)]
    pub user_data: JsonObject,
}

impl WorkerTypePolicy {
    /// Capacity units serviced by one instance of `instance_type`.
    ///
    /// Unknown types count as a single capacity unit so that resources of a
    /// type the policy no longer lists are still accounted for.
    pub fn capacity_of_type(&self, instance_type: &str) -> u32 {
        self.instance_types
            .iter()
            .find(|t| t.instance_type == instance_type)
            .map(|t| t.capacity)
            .unwrap_or(1)
    }

    /// Utility factor for `instance_type`, defaulting to 1.0 for unknown types.
    pub fn utility_of_type(&self, instance_type: &str) -> f64 {
        self.instance_types
            .iter()
            .find(|t| t.instance_type == instance_type)
            .map(|t| t.utility)
            .unwrap_or(1.0)
    }

    /// Zones the policy allows in `region`, or `None` when unrestricted.
    pub fn allowed_zones(&self, region: &str) -> Option<Vec<&str>> {
        if self.availability_zones.is_empty() {
            return None;
        }
        let zones: Vec<&str> = self
            .availability_zones
            .iter()
            .filter(|z| z.region == region)
            .map(|z| z.availability_zone.as_str())
            .collect();
        if zones.is_empty() { None } else { Some(zones) }
    }

    /// Whether the policy lists `region` at all.
    pub fn allows_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r.region == region)
    }
}

// ── Bid ────────────────────────────────────────────────────────────

/// A concrete (region, zone, instance type, price) combination chosen by
/// the bidding logic. Ephemeral: produced and consumed within one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    pub region: Region,
    pub zone: Zone,
    pub instance_type: InstanceType,
    /// Price actually submitted to the cloud (observed × safety factor).
    pub submitted_price: f64,
    /// Utility- and bias-adjusted price used for ranking.
    pub comparison_price: f64,
    /// Bias multiplier that was in effect when this bid was ranked.
    pub bias: f64,
}
