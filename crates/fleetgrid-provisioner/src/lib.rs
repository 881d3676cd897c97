//! fleetgrid-provisioner — the iteration controller.
//!
//! Drives the whole system: loads worker type policies, refreshes the
//! reconciled cloud view, runs housekeeping, computes capacity changes,
//! and submits (or cancels) spot bids. External collaborators — the task
//! queue, the policy store, the secret store — appear only as traits so
//! the controller can be exercised end to end against in-memory stubs.
//!
//! Failure handling is deliberately asymmetric: an unreadable backlog
//! skips one policy, a failed bid is retried with backoff, but a failed
//! scale-down fails the iteration, and too many failed iterations in a
//! row terminate the process for the supervisor to restart.

pub mod config;
pub mod error;
pub mod provisioner;
pub mod stores;
pub mod watchdog;

pub use config::ProvisionerConfig;
pub use error::{ProvisionerError, ProvisionerResult};
pub use provisioner::Provisioner;
pub use stores::{PolicyStore, Queue, SecretRecord, SecretStore, StoreError, StoreResult};
pub use watchdog::Watchdog;
