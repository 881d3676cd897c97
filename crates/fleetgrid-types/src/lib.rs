//! fleetgrid-types — shared domain types for the FleetGrid provisioner.
//!
//! These types cross crate boundaries: worker type policies (with their
//! versioned on-disk schema), bids produced by the capacity logic,
//! observations emitted by the reconciliation engine, and the observed-state
//! snapshot written back to the policy store each iteration.

pub mod observation;
pub mod policy;
pub mod schema;

pub use observation::{
    ObservedInstance, ObservedInternalRequest, ObservedRequest, ObservedState, Observation,
};
pub use policy::{
    AvailabilityZoneSpec, Bid, InstanceType, InstanceTypeSpec, JsonObject, PricingTable, Region,
    RegionSpec, WorkerTypePolicy, Zone,
};
pub use schema::{CURRENT_SCHEMA_VERSION, SchemaError, VersionedPolicy};
