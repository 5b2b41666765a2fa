//! Core error types for batchwork

use thiserror::Error;

/// Result type alias for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors surfaced by the repository, launcher, engine and operator
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// A job with this name is already registered
    #[error("A job configuration with this name [{0}] was already registered")]
    DuplicateJob(String),

    /// No job with this name is registered
    #[error("No job configuration with the name [{0}] was registered")]
    NoSuchJob(String),

    /// No job execution with this id exists in the repository
    #[error("No job execution with id {0}")]
    NoSuchJobExecution(i64),

    /// No job instance with this id exists in the repository
    #[error("No job instance with id {0}")]
    NoSuchJobInstance(i64),

    /// A non-terminal execution already exists for the instance
    #[error("A job execution for this job is already running: job={job_name}, instance={instance_id}")]
    JobInstanceAlreadyRunning { job_name: String, instance_id: i64 },

    /// Stop or abandon was requested for an execution that is not running
    #[error("Job execution {execution_id} is not running (status {status})")]
    JobExecutionNotRunning { execution_id: i64, status: String },

    /// The instance may not be run again with these parameters
    #[error("Job restart not allowed for job={job_name}: {reason}")]
    JobRestartNotAllowed { job_name: String, reason: String },

    /// The last execution of the instance already completed
    #[error("Job instance already complete: job={job_name}, instance={instance_id}")]
    JobInstanceAlreadyComplete { job_name: String, instance_id: i64 },

    /// The stored version advanced past the caller's last-seen version
    #[error("Concurrent modification of {entity} {id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        entity: String,
        id: String,
        expected: i64,
        found: i64,
    },

    /// The document store could not be reached after bounded retries
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Non-transient storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Parameters rejected by the job's validator
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    /// A step was started more times than its start limit allows
    #[error("Maximum start limit exceeded for step {step_name}: limit {limit}")]
    StartLimitExceeded { step_name: String, limit: u32 },

    /// The worker pool refused the submission
    #[error("Task rejected by executor: {0}")]
    TaskRejected(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BatchError {
    /// Check if this error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BatchError::StorageUnavailable(_) | BatchError::TaskRejected(_)
        )
    }

    /// Get the error code for operator-facing output
    pub fn error_code(&self) -> &'static str {
        match self {
            BatchError::DuplicateJob(_) => "DUPLICATE_JOB",
            BatchError::NoSuchJob(_) => "NO_SUCH_JOB",
            BatchError::NoSuchJobExecution(_) => "NO_SUCH_JOB_EXECUTION",
            BatchError::NoSuchJobInstance(_) => "NO_SUCH_JOB_INSTANCE",
            BatchError::JobInstanceAlreadyRunning { .. } => "JOB_ALREADY_RUNNING",
            BatchError::JobExecutionNotRunning { .. } => "JOB_NOT_RUNNING",
            BatchError::JobRestartNotAllowed { .. } => "RESTART_NOT_ALLOWED",
            BatchError::JobInstanceAlreadyComplete { .. } => "JOB_ALREADY_COMPLETE",
            BatchError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            BatchError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            BatchError::Storage(_) => "STORAGE_ERROR",
            BatchError::InvalidParameters(_) => "INVALID_PARAMETERS",
            BatchError::StartLimitExceeded { .. } => "START_LIMIT_EXCEEDED",
            BatchError::TaskRejected(_) => "TASK_REJECTED",
            BatchError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Serialization(err.to_string())
    }
}
