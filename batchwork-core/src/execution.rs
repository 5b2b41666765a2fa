//! Job instance, job execution and step execution entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ExecutionContext;
use crate::parameters::JobParameters;
use crate::status::{BatchStatus, ExitStatus};

/// Logical identity of a job run: job name plus the identifying parameter
/// signature. Never changes once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub version: i64,
    pub job_name: String,
    pub job_key: String,
}

impl JobInstance {
    pub fn new(id: i64, job_name: impl Into<String>, job_key: impl Into<String>) -> Self {
        Self {
            id,
            version: 0,
            job_name: job_name.into(),
            job_key: job_key.into(),
        }
    }
}

impl fmt::Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobInstance: id={}, job=[{}]", self.id, self.job_name)
    }
}

/// One attempt to run a job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub version: i64,
    pub job_instance: JobInstance,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_exceptions: Vec<String>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// New execution in STARTING state; the repository assigns the id
    pub fn new(id: i64, job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: 0,
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: now,
            start_time: None,
            end_time: None,
            last_updated: Some(now),
            failure_exceptions: Vec::new(),
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    /// Move to STARTED and stamp the start time
    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = BatchStatus::Started;
        self.exit_status = ExitStatus::executing();
        self.start_time = Some(now);
        self.last_updated = Some(now);
    }

    /// Upgrade the status, never downgrading a more severe one
    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Finish with the given status and exit status
    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus) {
        let now = Utc::now();
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(now);
        self.last_updated = Some(now);
    }

    pub fn add_failure(&mut self, message: impl Into<String>) {
        self.failure_exceptions.push(message.into());
    }

    /// All failures of this execution and its steps
    pub fn all_failures(&self) -> Vec<String> {
        let mut failures = self.failure_exceptions.clone();
        for step in &self.step_executions {
            failures.extend(step.failure_exceptions.iter().cloned());
        }
        failures
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }
}

impl fmt::Display for JobExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobExecution: id={}, version={}, job=[{}], status={}, exitStatus={}, startTime={}, endTime={}, parameters=[{}]",
            self.id,
            self.version,
            self.job_name(),
            self.status,
            self.exit_status,
            format_time(self.start_time),
            format_time(self.end_time),
            self.job_parameters
        )
    }
}

/// One attempt to run one step within a job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub version: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminate_only: bool,
    #[serde(default)]
    pub failure_exceptions: Vec<String>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    /// New step execution in STARTING state; the repository assigns the id
    pub fn new(step_name: impl Into<String>, job_execution_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            version: 0,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            start_time: now,
            end_time: None,
            last_updated: Some(now),
            terminate_only: false,
            failure_exceptions: Vec::new(),
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn mark_started(&mut self) {
        self.status = BatchStatus::Started;
        self.last_updated = Some(Utc::now());
    }

    /// Request the step to stop at its next checkpoint
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus) {
        let now = Utc::now();
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(now);
        self.last_updated = Some(now);
    }

    pub fn add_failure(&mut self, message: impl Into<String>) {
        self.failure_exceptions.push(message.into());
    }

    /// One-line summary used by operator tooling
    pub fn summary(&self) -> String {
        format!(
            "StepExecution: id={}, version={}, name={}, status={}, exitStatus={}, readCount={}, filterCount={}, writeCount={}, readSkipCount={}, writeSkipCount={}, processSkipCount={}, commitCount={}, rollbackCount={}",
            self.id,
            self.version,
            self.step_name,
            self.status,
            self.exit_status.exit_code,
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.write_skip_count,
            self.process_skip_count,
            self.commit_count,
            self.rollback_count
        )
    }
}

impl fmt::Display for StepExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> JobExecution {
        let instance = JobInstance::new(1, "load-orders", "key");
        JobExecution::new(10, instance, JobParameters::new())
    }

    #[test]
    fn test_new_execution_is_starting() {
        let execution = execution();
        assert_eq!(execution.status, BatchStatus::Starting);
        assert!(execution.is_running());
        assert_eq!(execution.exit_status.exit_code, ExitStatus::UNKNOWN);
    }

    #[test]
    fn test_upgrade_status_never_downgrades() {
        let mut execution = execution();
        execution.mark_started();
        execution.upgrade_status(BatchStatus::Failed);
        execution.upgrade_status(BatchStatus::Completed);
        assert_eq!(execution.status, BatchStatus::Failed);
    }

    #[test]
    fn test_step_counters_and_failures() {
        let mut step = StepExecution::new("extract", 10);
        step.read_skip_count = 1;
        step.write_skip_count = 2;
        step.add_failure("bad record");
        assert_eq!(step.skip_count(), 3);

        let mut execution = execution();
        execution.add_failure("job level");
        execution.step_executions.push(step);
        assert_eq!(execution.all_failures().len(), 2);
        assert!(execution.step_execution("extract").is_some());
    }
}
