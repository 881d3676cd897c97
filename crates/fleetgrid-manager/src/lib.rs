//! fleetgrid-manager — the reconciled view of cloud resources.
//!
//! The `ResourceManager` owns everything the provisioner believes about the
//! cloud: the last full API snapshot, recently dead resources, bids it has
//! submitted that the API does not show yet, and the pricing/zone tables.
//! One `update()` per iteration fans out per-region fetches, cancels
//! stalled requests, installs the new snapshot wholesale, and explains what
//! happened to everything that vanished since the previous snapshot.
//!
//! All maps are owned by the instance and mutated only through its own
//! methods from the single control-loop task, so no locking is needed.

pub mod config;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod state;

pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use manager::ResourceManager;
pub use state::{ApiState, CapacityBucket, DeadState, TrackedRequest};
