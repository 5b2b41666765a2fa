//! Storage error types

use batchwork_core::BatchError;
use batchwork_resilience::{RetryError, Retryable};
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-related errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The store could not be reached
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection failures persisted through every retry
    #[error("Database unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// Query execution errors
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Document not found
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Duplicate id or unique index violation
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Versioned write lost against a newer stored version
    #[error("Version conflict on {collection}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: i64,
        found: i64,
    },

    /// Document shape rejected by the store
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StorageError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::ConnectionFailed(_))
    }

    /// Get a user-friendly error message that doesn't expose internal details
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::ConnectionFailed(_) | StorageError::Unavailable { .. } => {
                "Database connection unavailable"
            }
            StorageError::QueryFailed(_) => "Database operation failed",
            StorageError::NotFound { .. } => "Requested item not found",
            StorageError::DuplicateKey(_) => "Item already exists",
            StorageError::VersionConflict { .. } => "Operation conflict, please retry",
            StorageError::InvalidDocument(_) => "Invalid data provided",
            StorageError::SerializationError(_) => "An error occurred",
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NOT_FOUND",
            StorageError::DuplicateKey(_) => "DUPLICATE_KEY",
            StorageError::ConnectionFailed(_) => "CONNECTION_ERROR",
            StorageError::Unavailable { .. } => "STORAGE_UNAVAILABLE",
            StorageError::QueryFailed(_) => "QUERY_ERROR",
            StorageError::VersionConflict { .. } => "CONCURRENCY_ERROR",
            StorageError::InvalidDocument(_) => "VALIDATION_ERROR",
            StorageError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        StorageError::is_retryable(self)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<RetryError<StorageError>> for StorageError {
    fn from(err: RetryError<StorageError>) -> Self {
        match err {
            RetryError::MaxAttemptsExceeded { attempts, last_error } => StorageError::Unavailable {
                attempts,
                message: last_error.to_string(),
            },
            RetryError::NonRetryable(error) => error,
        }
    }
}

/// Storage failures as seen by the batch layers
impl From<StorageError> for BatchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(_) | StorageError::Unavailable { .. } => {
                BatchError::StorageUnavailable(err.to_string())
            }
            StorageError::VersionConflict {
                collection,
                id,
                expected,
                found,
            } => BatchError::ConcurrentModification {
                entity: collection,
                id,
                expected,
                found,
            },
            StorageError::SerializationError(msg) => BatchError::Serialization(msg),
            other => BatchError::Storage(other.to_string()),
        }
    }
}
