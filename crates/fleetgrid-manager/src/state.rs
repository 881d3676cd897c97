//! Reconciliation state buckets.

use fleetgrid_cloud::{BidRequest, Instance};

/// The full snapshot from the last successful poll. Replaced wholesale,
/// never patched incrementally.
#[derive(Debug, Clone, Default)]
pub struct ApiState {
    pub instances: Vec<Instance>,
    pub requests: Vec<BidRequest>,
}

/// Recently terminated/closed resources, used to explain why something
/// vanished from `ApiState`.
#[derive(Debug, Clone, Default)]
pub struct DeadState {
    pub instances: Vec<Instance>,
    pub requests: Vec<BidRequest>,
}

/// A bid this process issued that has not yet appeared in the API.
#[derive(Debug, Clone)]
pub struct TrackedRequest {
    pub worker_type: String,
    pub request_id: String,
    pub region: String,
    pub zone: String,
    pub instance_type: String,
    /// Unix timestamp (seconds) of submission.
    pub submitted_at: u64,
}

/// A vanished resource whose terminal cause is not yet explainable.
#[derive(Debug, Clone)]
pub struct AwaitingEntry {
    pub resource_id: String,
    pub first_seen_at: u64,
    pub iterations: u32,
}

/// The state buckets capacity queries and kill operations select over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityBucket {
    /// Running instances.
    Running,
    /// Instances still booting.
    Pending,
    /// Open bid requests, including internally tracked not-yet-visible ones.
    SpotReq,
}

impl CapacityBucket {
    pub const ALL: [CapacityBucket; 3] = [
        CapacityBucket::Running,
        CapacityBucket::Pending,
        CapacityBucket::SpotReq,
    ];
}

/// Extract the worker type from a provisioner-owned key name.
///
/// Key names follow `{prefix}{worker_type}:{key_hash}`. Returns `None` for
/// foreign resources.
pub fn worker_type_of(key_prefix: &str, key_name: &str) -> Option<String> {
    let rest = key_name.strip_prefix(key_prefix)?;
    let worker_type = rest.split(':').next()?;
    if worker_type.is_empty() {
        None
    } else {
        Some(worker_type.to_string())
    }
}
