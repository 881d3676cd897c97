//! Resource manager error types.

use thiserror::Error;

/// Errors from reconciliation and lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cloud state fetch timed out after {0} seconds")]
    FetchTimeout(u64),

    #[error("cloud error: {0}")]
    Cloud(#[from] fleetgrid_cloud::CloudError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
