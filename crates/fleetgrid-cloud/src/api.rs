//! The `CloudCompute` trait — every provider call the core consumes.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{BidRequest, Instance, PricePoint};

/// Errors surfaced by cloud provider calls.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// A fully materialized bid submission.
#[derive(Debug, Clone)]
pub struct BidRequestSpec {
    pub availability_zone: String,
    pub instance_type: String,
    pub price: f64,
    /// The validated launch spec, including key name and user data.
    pub launch_spec: serde_json::Value,
    pub key_name: String,
}

/// The cloud compute API as consumed by the provisioner.
///
/// All listing calls are scoped per region; ownership filtering by key-name
/// prefix happens in the caller, not here.
#[async_trait]
pub trait CloudCompute: Send + Sync {
    /// Instances in a live state (pending or running).
    async fn live_instances(&self, region: &str) -> CloudResult<Vec<Instance>>;

    /// Recently terminated instances, with post-mortem state reasons.
    async fn dead_instances(&self, region: &str) -> CloudResult<Vec<Instance>>;

    /// Bid requests still open or active.
    async fn live_bid_requests(&self, region: &str) -> CloudResult<Vec<BidRequest>>;

    /// Recently closed, cancelled, failed, or fulfilled bid requests.
    async fn dead_bid_requests(&self, region: &str) -> CloudResult<Vec<BidRequest>>;

    /// Availability zones usable in this region.
    async fn availability_zones(&self, region: &str) -> CloudResult<Vec<String>>;

    /// Price observations newer than `since` (unix seconds).
    async fn price_history(&self, region: &str, since: u64) -> CloudResult<Vec<PricePoint>>;

    /// Submit a bid request; returns the new request id.
    async fn submit_bid_request(&self, region: &str, spec: &BidRequestSpec)
    -> CloudResult<String>;

    /// Cancel open bid requests.
    async fn cancel_bid_requests(&self, region: &str, request_ids: &[String]) -> CloudResult<()>;

    /// Terminate instances.
    async fn terminate_instances(&self, region: &str, instance_ids: &[String]) -> CloudResult<()>;

    /// Attach tags to resources.
    async fn create_tags(
        &self,
        region: &str,
        resource_ids: &[String],
        tags: &HashMap<String, String>,
    ) -> CloudResult<()>;

    /// Key pair names starting with `prefix`.
    async fn list_key_pairs(&self, region: &str, prefix: &str) -> CloudResult<Vec<String>>;

    /// Import a public key under `name`. Creating an existing name is an
    /// error; callers check first.
    async fn create_key_pair(&self, region: &str, name: &str, public_key: &str)
    -> CloudResult<()>;

    /// Delete a key pair. Deleting a missing name is not an error.
    async fn delete_key_pair(&self, region: &str, name: &str) -> CloudResult<()>;
}
