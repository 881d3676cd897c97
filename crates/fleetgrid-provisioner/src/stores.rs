//! Trait seams to the external services the controller talks to.
//!
//! The task queue, the policy store, and the secret store are operated
//! elsewhere; the provisioner only consumes them. Each is a small async
//! trait with a string-carrying error, so transport failures surface as
//! messages without this crate depending on any client library.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetgrid_types::{ObservedState, WorkerTypePolicy};

/// Failure reported by an external store or queue.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

pub type StoreResult<T> = Result<T, StoreError>;

/// The task queue: the only thing the controller asks it is how deep the
/// backlog for one worker type currently is.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn pending_tasks(&self, worker_type: &str) -> StoreResult<i64>;
}

/// The worker type policy store.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All configured policies, already migrated to the current schema.
    async fn list_policies(&self) -> StoreResult<Vec<WorkerTypePolicy>>;

    /// Persist the per-policy view of what the provisioner believes it
    /// owns, for operator inspection.
    async fn put_observed_state(&self, state: &ObservedState) -> StoreResult<()>;
}

/// A secret record created alongside each submitted bid. The worker
/// redeems it with the single-use token baked into its user data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretRecord {
    /// Single-use redemption token, also present in the instance's user
    /// data.
    pub token: String,
    pub worker_type: String,
    /// Static secrets copied from the policy.
    pub secrets: serde_json::Value,
    /// Scopes granted to the worker on redemption.
    pub scopes: Vec<String>,
    /// Unix timestamp (seconds) after which the record is void.
    pub expires_at: u64,
}

/// The secret store bids hand their credentials to.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_secret(&self, record: &SecretRecord) -> StoreResult<()>;
}
