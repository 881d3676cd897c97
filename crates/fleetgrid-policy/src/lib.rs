//! fleetgrid-policy — pure per-worker-type capacity and bidding logic.
//!
//! Three operations, all free of cloud calls:
//! - `determine_capacity_change`: (running, pending, backlog) → capacity
//!   delta, clamped to the policy's bounds
//! - `determine_spot_bids`: delta → ranked (region, zone, type, price)
//!   bids via greedy comparison-price minimization
//! - `create_launch_spec`: bid → fully materialized, validated launch
//!   request with injected user data

pub mod bidding;
pub mod capacity;
pub mod error;
pub mod launch_spec;

pub use bidding::{BidConfig, determine_spot_bids};
pub use capacity::determine_capacity_change;
pub use error::{PolicyError, PolicyResult};
pub use launch_spec::create_launch_spec;
