//! Batchwork execution engine
//!
//! This crate runs job executions: a bounded [`WorkerPool`] supplies the
//! concurrency, the [`JobRunner`] drives one execution through its steps and
//! checkpoints, and the [`JobLauncher`] ties repository, runner and pool
//! together.

pub mod error;
pub mod launcher;
pub mod pool;
pub mod runner;

// Re-export main types
pub use error::PoolError;
pub use launcher::{JobExecutionHandle, JobLauncher};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig};
pub use runner::JobRunner;
