//! Core domain models and types for batchwork
//!
//! This crate defines the language of the batch core: job parameters and the
//! identity they give a job instance, job and step executions with their
//! status algebra, execution contexts, and the traits a job definition
//! implements. It has no storage or runtime dependencies.

pub mod context;
pub mod error;
pub mod execution;
pub mod flow;
pub mod job;
pub mod parameters;
pub mod status;

// Re-export commonly used types at the crate root
pub use context::ExecutionContext;
pub use error::{BatchError, Result};
pub use execution::{JobExecution, JobInstance, StepExecution};
pub use flow::{FlowAction, TransitionTable};
pub use job::{
    ChunkContext, Job, JobExecutionListener, RepeatStatus, SimpleJob, SimpleJobBuilder, Step,
};
pub use parameters::{
    DefaultJobParametersValidator, JobParameter, JobParameters, JobParametersBuilder,
    JobParametersIncrementer, JobParametersValidator, ParameterValue, RunIdIncrementer,
};
pub use status::{BatchStatus, ExitStatus};
