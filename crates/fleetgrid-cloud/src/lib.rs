//! fleetgrid-cloud — the seam between the provisioner and the cloud
//! compute provider.
//!
//! Defines the resource records the provisioner reasons about (`Instance`,
//! `BidRequest`), the `CloudCompute` trait covering every call the core
//! consumes, and `InMemoryCloud`, an in-process fake backend used by the
//! manager and provisioner test suites.

pub mod api;
pub mod memory;
pub mod types;

pub use api::{BidRequestSpec, CloudCompute, CloudError, CloudResult};
pub use memory::InMemoryCloud;
pub use types::{
    BidRequest, BidRequestState, BidStatus, Instance, InstanceState, PricePoint, StateReason,
};
