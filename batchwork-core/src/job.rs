//! Job and step definitions
//!
//! A job is an ordered list of steps plus a transition table. A step is
//! driven chunk by chunk: every call to [`Step::execute`] processes one
//! chunk and the engine writes a checkpoint before calling it again.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::execution::{JobExecution, StepExecution};
use crate::flow::TransitionTable;
use crate::parameters::{JobParameters, JobParametersIncrementer, JobParametersValidator};

/// Whether a step has more chunks to process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    Continuable,
    Finished,
}

/// State handed to a step for one chunk
pub struct ChunkContext<'a> {
    pub step_execution: &'a mut StepExecution,
    pub job_parameters: &'a JobParameters,
    pub job_context: &'a mut ExecutionContext,
}

impl<'a> ChunkContext<'a> {
    pub fn step_context(&mut self) -> &mut ExecutionContext {
        &mut self.step_execution.execution_context
    }
}

/// One step of a job
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Run again on restart even if the previous execution completed
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Maximum number of executions of this step within one instance
    fn start_limit(&self) -> u32 {
        u32::MAX
    }

    /// Process one chunk
    async fn execute(&self, context: &mut ChunkContext<'_>) -> anyhow::Result<RepeatStatus>;
}

/// Callbacks around a job execution
#[async_trait]
pub trait JobExecutionListener: Send + Sync {
    async fn before_job(&self, _execution: &mut JobExecution) {}

    async fn after_job(&self, _execution: &mut JobExecution) {}
}

/// A job definition
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn is_restartable(&self) -> bool {
        true
    }

    /// Whether a completed instance may run again with identical parameters
    fn allow_rerun_completed(&self) -> bool {
        false
    }

    fn steps(&self) -> &[Arc<dyn Step>];

    fn transitions(&self) -> &TransitionTable;

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    fn validator(&self) -> Option<&dyn JobParametersValidator> {
        None
    }

    fn listeners(&self) -> &[Arc<dyn JobExecutionListener>] {
        &[]
    }
}

/// Job running its steps in declaration order
pub struct SimpleJob {
    name: String,
    restartable: bool,
    allow_rerun_completed: bool,
    steps: Vec<Arc<dyn Step>>,
    transitions: TransitionTable,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
    validator: Option<Box<dyn JobParametersValidator>>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
}

impl SimpleJob {
    pub fn builder(name: impl Into<String>) -> SimpleJobBuilder {
        SimpleJobBuilder::new(name)
    }
}

impl fmt::Debug for SimpleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleJob")
            .field("name", &self.name)
            .field("restartable", &self.restartable)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Job for SimpleJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn allow_rerun_completed(&self) -> bool {
        self.allow_rerun_completed
    }

    fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer.as_deref()
    }

    fn validator(&self) -> Option<&dyn JobParametersValidator> {
        self.validator.as_deref()
    }

    fn listeners(&self) -> &[Arc<dyn JobExecutionListener>] {
        &self.listeners
    }
}

/// Builder for [`SimpleJob`]
pub struct SimpleJobBuilder {
    job: SimpleJob,
}

impl SimpleJobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: SimpleJob {
                name: name.into(),
                restartable: true,
                allow_rerun_completed: false,
                steps: Vec::new(),
                transitions: TransitionTable::new(),
                incrementer: None,
                validator: None,
                listeners: Vec::new(),
            },
        }
    }

    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.job.steps.push(step);
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.job.restartable = restartable;
        self
    }

    pub fn allow_rerun_completed(mut self, allow: bool) -> Self {
        self.job.allow_rerun_completed = allow;
        self
    }

    pub fn transitions(mut self, transitions: TransitionTable) -> Self {
        self.job.transitions = transitions;
        self
    }

    pub fn incrementer(mut self, incrementer: impl JobParametersIncrementer + 'static) -> Self {
        self.job.incrementer = Some(Box::new(incrementer));
        self
    }

    pub fn validator(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.job.validator = Some(Box::new(validator));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn JobExecutionListener>) -> Self {
        self.job.listeners.push(listener);
        self
    }

    pub fn build(self) -> SimpleJob {
        self.job
    }
}
