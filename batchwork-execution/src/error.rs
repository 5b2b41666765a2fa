//! Error types for the worker pool

use batchwork_core::BatchError;
use thiserror::Error;

/// Worker pool submission errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool saturated: {workers} workers busy and {queued} tasks queued")]
    Saturated { workers: usize, queued: usize },

    #[error("Worker pool is shut down")]
    ShutDown,
}

impl From<PoolError> for BatchError {
    fn from(err: PoolError) -> Self {
        BatchError::TaskRejected(err.to_string())
    }
}
