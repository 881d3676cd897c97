//! Capacity policy error types.

use thiserror::Error;

/// Errors from bidding and launch-spec construction.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no priced combination available for worker type {worker_type}")]
    NoPricingData { worker_type: String },

    #[error("instance type {instance_type} of worker type {worker_type} declares zero capacity")]
    ZeroCapacityType {
        worker_type: String,
        instance_type: String,
    },

    #[error("submitted price {price} breaches the sanity ceiling {ceiling}")]
    BidSanityCeiling { price: f64, ceiling: f64 },

    #[error("key {key} is not allowed in the {layer} launch-spec layer")]
    MisplacedKey { key: String, layer: String },

    #[error("key {key} appears in both the {first} and {second} override layers")]
    AmbiguousOverride {
        key: String,
        first: String,
        second: String,
    },

    #[error("unsupported launch-spec key: {0}")]
    UnknownKey(String),

    #[error("launch spec is missing required key: {0}")]
    MissingKey(String),

    #[error("launch-spec keys {0} and {1} are mutually exclusive")]
    ExclusiveKeys(String, String),

    #[error("policy {worker_type} does not cover {what}")]
    NotCovered { worker_type: String, what: String },
}

pub type PolicyResult<T> = Result<T, PolicyError>;
