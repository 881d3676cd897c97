//! Cloud resource records.
//!
//! Shapes mirror what an EC2-style API returns. Key names carry the
//! provisioner's ownership convention, so every record keeps its
//! `key_name` for classification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a cloud instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// Whether this state counts as live from the provisioner's view.
    pub fn is_live(self) -> bool {
        matches!(self, InstanceState::Pending | InstanceState::Running)
    }
}

/// Why an instance reached a terminal state, from the post-mortem record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateReason {
    pub code: String,
    pub message: String,
}

impl StateReason {
    /// Reason code the provider uses for spot-price terminations.
    pub const SPOT_TERMINATION: &'static str = "Server.SpotInstanceTermination";

    pub fn is_spot_kill(&self) -> bool {
        self.code == Self::SPOT_TERMINATION
    }
}

/// A cloud instance, live or dead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub instance_id: String,
    /// Keypair name; carries the provisioner ownership prefix.
    pub key_name: String,
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub image_id: String,
    pub state: InstanceState,
    /// The bid request this instance fulfilled, if it came from one.
    pub bid_request_id: Option<String>,
    /// Unix timestamp (seconds) of launch. Missing for instances the
    /// provider has not yet fully described.
    pub launch_time: Option<u64>,
    /// Termination cause. Only post-mortem records carry a useful value.
    pub state_reason: Option<StateReason>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

// ── Bid requests ───────────────────────────────────────────────────

/// Lifecycle state of a capacity bid request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BidRequestState {
    Open,
    Active,
    Closed,
    Cancelled,
    Failed,
}

/// Fine-grained status of a bid request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidStatus {
    pub code: String,
    pub message: String,
    /// Unix timestamp (seconds) of the last status transition.
    pub update_time: u64,
}

impl BidStatus {
    /// Status code of a fulfilled request.
    pub const FULFILLED: &'static str = "fulfilled";
}

/// A capacity bid request, live or dead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidRequest {
    pub request_id: String,
    /// Keypair name from the launch spec; carries the ownership prefix.
    pub key_name: String,
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub image_id: String,
    pub bid_price: f64,
    pub state: BidRequestState,
    pub status: BidStatus,
    /// Unix timestamp (seconds) when the request was created.
    pub create_time: u64,
    /// The instance that fulfilled this request, once one exists.
    pub instance_id: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl BidRequest {
    /// A dead request that ended in fulfillment.
    pub fn is_fulfilled(&self) -> bool {
        self.state == BidRequestState::Active && self.status.code == BidStatus::FULFILLED
    }
}

/// One point from the price history query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub instance_type: String,
    pub availability_zone: String,
    pub price: f64,
    /// Unix timestamp (seconds) of the observation.
    pub timestamp: u64,
}
