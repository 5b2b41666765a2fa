//! Resilience patterns for batchwork
//!
//! Retry with bounded attempts and backoff, used around document store
//! round-trips so transient connectivity failures do not lose track of a
//! running execution.

pub mod backoff;
pub mod retry;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
