//! Operator facade for batchwork
//!
//! [`JobOperator`] is the administrative surface a CLI or dashboard calls:
//! start, stop, restart and abandon executions and query their state by job
//! name or execution id. [`BatchContext`] is the single startup routine that
//! builds stores, repository, explorer, pool, launcher and operator from a
//! [`BatchConfig`](batchwork_config::BatchConfig).

pub mod context;
pub mod operator;

pub use context::BatchContext;
pub use operator::JobOperator;
