//! Controller error type.

use fleetgrid_manager::ManagerError;
use thiserror::Error;

use crate::stores::StoreError;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The policy store could not be read; without policies an iteration
    /// has nothing to do.
    #[error("policy store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// The consecutive-failure circuit breaker tripped.
    #[error("{0} consecutive failed iterations, giving up")]
    TooManyFailures(u32),
}

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;
