//! Stored shapes of batch entities
//!
//! Executions are stored flat: contexts live in their own collection and
//! step executions reference their job execution by id.

use batchwork_core::{
    BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameter, JobParameters,
    ParameterValue, StepExecution,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored job instance plus the pointer used to claim it for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstanceRecord {
    pub id: i64,
    pub version: i64,
    pub job_name: String,
    pub job_key: String,
    /// Most recently created execution; set when a launch claims the instance
    #[serde(default)]
    pub last_execution_id: Option<i64>,
    /// When the current claim was taken; cleared when a claim is released
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl JobInstanceRecord {
    pub fn new(id: i64, job_name: &str, job_key: &str) -> Self {
        Self {
            id,
            version: 0,
            job_name: job_name.to_string(),
            job_key: job_key.to_string(),
            last_execution_id: None,
            claimed_at: None,
        }
    }

    pub fn to_instance(&self) -> JobInstance {
        JobInstance {
            id: self.id,
            version: self.version,
            job_name: self.job_name.clone(),
            job_key: self.job_key.clone(),
        }
    }
}

/// One parameter; stored as a list entry since names may contain dots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    pub value: ParameterValue,
    pub identifying: bool,
}

fn parameters_to_records(parameters: &JobParameters) -> Vec<ParameterRecord> {
    parameters
        .iter()
        .map(|(name, parameter)| ParameterRecord {
            name: name.clone(),
            value: parameter.value.clone(),
            identifying: parameter.identifying,
        })
        .collect()
}

fn records_to_parameters(records: Vec<ParameterRecord>) -> JobParameters {
    let mut parameters = JobParameters::new();
    for record in records {
        parameters.insert(
            record.name,
            JobParameter {
                value: record.value,
                identifying: record.identifying,
            },
        );
    }
    parameters
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub id: i64,
    pub version: i64,
    pub job_instance_id: i64,
    pub job_name: String,
    pub job_parameters: Vec<ParameterRecord>,
    pub status: BatchStatus,
    pub exit_code: String,
    pub exit_description: String,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_exceptions: Vec<String>,
}

impl From<&JobExecution> for JobExecutionRecord {
    fn from(execution: &JobExecution) -> Self {
        Self {
            id: execution.id,
            version: execution.version,
            job_instance_id: execution.job_instance.id,
            job_name: execution.job_instance.job_name.clone(),
            job_parameters: parameters_to_records(&execution.job_parameters),
            status: execution.status,
            exit_code: execution.exit_status.exit_code.clone(),
            exit_description: execution.exit_status.exit_description.clone(),
            create_time: execution.create_time,
            start_time: execution.start_time,
            end_time: execution.end_time,
            last_updated: execution.last_updated,
            failure_exceptions: execution.failure_exceptions.clone(),
        }
    }
}

impl JobExecutionRecord {
    /// Domain execution without context or step executions
    pub fn into_execution(self, job_instance: JobInstance) -> JobExecution {
        let mut execution = JobExecution::new(
            self.id,
            job_instance,
            records_to_parameters(self.job_parameters),
        );
        execution.version = self.version;
        execution.status = self.status;
        execution.exit_status = ExitStatus {
            exit_code: self.exit_code,
            exit_description: self.exit_description,
        };
        execution.create_time = self.create_time;
        execution.start_time = self.start_time;
        execution.end_time = self.end_time;
        execution.last_updated = self.last_updated;
        execution.failure_exceptions = self.failure_exceptions;
        execution
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub id: i64,
    pub version: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_code: String,
    pub exit_description: String,
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
}

impl From<&StepExecution> for StepExecutionRecord {
    fn from(step: &StepExecution) -> Self {
        Self {
            id: step.id,
            version: step.version,
            job_execution_id: step.job_execution_id,
            step_name: step.step_name.clone(),
            status: step.status,
            exit_code: step.exit_status.exit_code.clone(),
            exit_description: step.exit_status.exit_description.clone(),
            read_count: step.read_count,
            write_count: step.write_count,
            filter_count: step.filter_count,
            commit_count: step.commit_count,
            rollback_count: step.rollback_count,
            read_skip_count: step.read_skip_count,
            process_skip_count: step.process_skip_count,
            write_skip_count: step.write_skip_count,
            start_time: step.start_time,
            end_time: step.end_time,
            last_updated: step.last_updated,
            terminate_only: step.terminate_only,
            failure_exceptions: step.failure_exceptions.clone(),
        }
    }
}

impl StepExecutionRecord {
    /// Domain step execution without its context
    pub fn into_step_execution(self) -> StepExecution {
        let mut step = StepExecution::new(self.step_name, self.job_execution_id);
        step.id = self.id;
        step.version = self.version;
        step.status = self.status;
        step.exit_status = ExitStatus {
            exit_code: self.exit_code,
            exit_description: self.exit_description,
        };
        step.read_count = self.read_count;
        step.write_count = self.write_count;
        step.filter_count = self.filter_count;
        step.commit_count = self.commit_count;
        step.rollback_count = self.rollback_count;
        step.read_skip_count = self.read_skip_count;
        step.process_skip_count = self.process_skip_count;
        step.write_skip_count = self.write_skip_count;
        step.start_time = self.start_time;
        step.end_time = self.end_time;
        step.last_updated = self.last_updated;
        step.terminate_only = self.terminate_only;
        step.failure_exceptions = self.failure_exceptions;
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_document, to_document};

    #[test]
    fn test_job_execution_record_keeps_parameters() {
        let parameters = JobParameters::builder()
            .add_long("run.id", 4)
            .add_parameter(
                "note",
                JobParameter::non_identifying(ParameterValue::String("nightly".to_string())),
            )
            .build();
        let instance = JobInstance::new(1, "load-orders", parameters.identifying_signature());
        let mut execution = JobExecution::new(7, instance.clone(), parameters.clone());
        execution.mark_started();

        let document = to_document(&JobExecutionRecord::from(&execution)).unwrap();
        assert!(document.keys().all(|key| !key.contains('.')));

        let record: JobExecutionRecord = from_document(document).unwrap();
        let restored = record.into_execution(instance);
        assert_eq!(restored.id, 7);
        assert_eq!(restored.status, BatchStatus::Started);
        assert_eq!(restored.job_parameters, parameters);
        assert_eq!(restored.start_time, execution.start_time);
    }

    #[test]
    fn test_step_execution_record() {
        let mut step = StepExecution::new("extract", 7);
        step.id = 3;
        step.read_count = 12;
        step.commit_count = 2;
        step.add_failure("boom");

        let record = StepExecutionRecord::from(&step);
        let restored = record.into_step_execution();
        assert_eq!(restored, step);
    }
}
