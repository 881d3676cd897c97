//! Observations emitted by the reconciliation engine.
//!
//! Each `update()` pass explains what happened to resources that vanished
//! from the cloud view since the previous pass. Observations are returned
//! to the controller and logged; time-series emission is out of scope.

use serde::{Deserialize, Serialize};

/// A resolved fate of a vanished resource, or an internal-ledger expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    /// A bid request left the live set because it was fulfilled.
    BidFulfilled {
        request_id: String,
        worker_type: String,
        region: String,
        zone: String,
        instance_type: String,
    },
    /// A bid request closed without fulfillment.
    BidFailed {
        request_id: String,
        worker_type: String,
        region: String,
        status_code: String,
        status_message: String,
    },
    /// An instance left the live set with a known termination reason.
    InstanceTerminated {
        instance_id: String,
        worker_type: String,
        region: String,
        reason_code: String,
        reason_message: String,
        /// True when the reason indicates a spot-price kill.
        spot_kill: bool,
        /// The price that was bid for this instance, when a spot kill lets
        /// us report a price floor.
        bid_price: Option<f64>,
    },
    /// An internally tracked bid never became visible in the cloud API
    /// within the tracking timeout.
    RequestNeverAppeared {
        request_id: String,
        worker_type: String,
        region: String,
    },
}

// ── Observed-state snapshot ────────────────────────────────────────

/// Derived per-policy record written back to the policy store each
/// iteration so operators can see what the provisioner believes it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedState {
    pub worker_type: String,
    pub instances: Vec<ObservedInstance>,
    pub requests: Vec<ObservedRequest>,
    pub internal_tracked_requests: Vec<ObservedInternalRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedInstance {
    pub id: String,
    pub bid_request_id: Option<String>,
    pub image: String,
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    pub state: String,
    pub launched_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedRequest {
    pub id: String,
    pub image: String,
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    pub submitted_at: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedInternalRequest {
    pub id: String,
    pub region: String,
    pub zone: String,
    pub instance_type: String,
    pub submitted_at: u64,
}
