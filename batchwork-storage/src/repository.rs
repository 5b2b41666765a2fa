//! Job repository: creation and persistence of instances and executions
//!
//! Consistency comes from the store, not from in-process locks. A launch
//! claims its job instance with a version-checked write, so two concurrent
//! launches of the same instance cannot both create an execution. Execution
//! updates are version-checked the same way.

use async_trait::async_trait;
use batchwork_core::{
    BatchError, BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameters, Result,
    StepExecution,
};
use batchwork_resilience::RetryPolicy;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::dao::{BatchDaos, ContextOwner};
use crate::document::DocumentStore;
use crate::entities::{JobExecutionRecord, JobInstanceRecord, StepExecutionRecord};
use crate::error::StorageError;

/// Persistence of job instances, job executions, step executions and their
/// execution contexts
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn is_job_instance_exists(&self, job_name: &str, parameters: &JobParameters) -> Result<bool>;

    async fn get_job_instance(&self, job_name: &str, parameters: &JobParameters) -> Result<Option<JobInstance>>;

    /// Find or create the instance for (name, parameters) and start a new
    /// execution of it in STARTING state.
    ///
    /// Fails with `JobInstanceAlreadyRunning` if the instance has a running
    /// execution and with `JobRestartNotAllowed` if it already completed.
    async fn create_job_execution(&self, job_name: &str, parameters: &JobParameters) -> Result<JobExecution> {
        self.create_job_execution_with(job_name, parameters, false).await
    }

    /// Like `create_job_execution`; `allow_rerun_completed` lets a completed
    /// instance run again from scratch
    async fn create_job_execution_with(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_rerun_completed: bool,
    ) -> Result<JobExecution>;

    /// Persist the execution; fails with `ConcurrentModification` when the
    /// stored version moved past `execution.version`
    async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<()>;

    /// Pull a newer stored status (e.g. STOPPING set by an operator) and
    /// version into the in-memory execution
    async fn synchronize_status(&self, execution: &mut JobExecution) -> Result<()>;

    /// Assign an id to a new step execution and persist it
    async fn add_step_execution(&self, step: &mut StepExecution) -> Result<()>;

    async fn update_step_execution(&self, step: &mut StepExecution) -> Result<()>;

    /// Persist the dirty keys of the job execution's context
    async fn update_job_execution_context(&self, execution: &mut JobExecution) -> Result<()>;

    /// Persist the dirty keys of the step execution's context
    async fn update_step_execution_context(&self, step: &mut StepExecution) -> Result<()>;

    async fn get_last_job_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>>;

    /// Latest execution of the named step within the instance
    async fn get_last_step_execution(&self, instance: &JobInstance, step_name: &str) -> Result<Option<StepExecution>>;

    async fn get_step_execution_count(&self, instance: &JobInstance, step_name: &str) -> Result<u32>;

    /// Id of the newest execution of the instance that COMPLETED. Steps
    /// that completed at or before it belong to a finished run.
    async fn get_last_completed_execution_id(&self, instance: &JobInstance) -> Result<Option<i64>>;

    async fn get_job_execution(&self, execution_id: i64) -> Result<Option<JobExecution>>;
}

/// [`JobRepository`] over a [`DocumentStore`]
#[derive(Debug, Clone)]
pub struct SimpleJobRepository {
    daos: BatchDaos,
}

impl SimpleJobRepository {
    /// Connect to the store and make sure the instance key index exists
    pub async fn new(store: Arc<dyn DocumentStore>, retry_policy: RetryPolicy) -> Result<Self> {
        let daos = BatchDaos::new(store, retry_policy);
        daos.instances.ensure_indexes().await?;
        Ok(Self { daos })
    }

    fn already_running(job_name: &str, instance_id: i64) -> BatchError {
        BatchError::JobInstanceAlreadyRunning {
            job_name: job_name.to_string(),
            instance_id,
        }
    }

    fn restart_not_allowed(job_name: &str, reason: String) -> BatchError {
        BatchError::JobRestartNotAllowed {
            job_name: job_name.to_string(),
            reason,
        }
    }

    /// Write the execution document, inheriting the context of the last
    /// execution unless that one completed
    async fn insert_execution(
        &self,
        execution: &mut JobExecution,
        last: Option<&JobExecutionRecord>,
    ) -> Result<()> {
        if let Some(last) = last {
            if last.status != BatchStatus::Completed {
                execution.execution_context = self.daos.contexts.load(ContextOwner::Job(last.id)).await?;
            }
        }
        execution.execution_context.mark_all_dirty();
        self.daos
            .executions
            .insert(&JobExecutionRecord::from(&*execution))
            .await?;
        Ok(())
    }

    /// Point the instance back at its previous execution after a failed
    /// launch. A claim that cannot be released goes stale and is ignored by
    /// later launches.
    async fn release_claim(&self, claimed: &JobInstanceRecord, previous_execution_id: Option<i64>) {
        match self.daos.instances.release(claimed, previous_execution_id).await {
            Ok(_) => debug!("Released claim on instance {}", claimed.id),
            Err(error) => warn!(
                "Could not release claim on instance {}: {}",
                claimed.id, error
            ),
        }
    }

    /// Record FAILED on an execution whose creation did not finish, so the
    /// instance stays restartable
    async fn fail_unstarted(&self, execution: &mut JobExecution, error: &BatchError) {
        execution.add_failure(error.to_string());
        execution.finish(
            BatchStatus::Failed,
            ExitStatus::failed().with_description(&error.to_string()),
        );
        if let Err(update_error) = self.update_job_execution(execution).await {
            warn!(
                "Could not mark job execution {} FAILED after a failed launch: {}",
                execution.id, update_error
            );
        }
    }

    async fn job_execution_ids(&self, instance: &JobInstance) -> Result<Vec<i64>> {
        Ok(self
            .daos
            .executions
            .find_by_instance(instance.id)
            .await?
            .iter()
            .map(|record| record.id)
            .collect())
    }
}

/// A claim without a written execution is left over from a failed launch
/// once it is older than this
const STALE_CLAIM_AFTER_SECS: i64 = 60;

fn claim_is_stale(instance: &JobInstanceRecord) -> bool {
    match instance.claimed_at {
        Some(claimed_at) => Utc::now() - claimed_at > chrono::Duration::seconds(STALE_CLAIM_AFTER_SECS),
        None => true,
    }
}

/// Same write apart from the timestamp every update stamps
fn same_job_write(stored: &JobExecutionRecord, intended: &JobExecutionRecord) -> bool {
    let mut stored = stored.clone();
    stored.last_updated = intended.last_updated;
    stored == *intended
}

fn same_step_write(stored: &StepExecutionRecord, intended: &StepExecutionRecord) -> bool {
    let mut stored = stored.clone();
    stored.last_updated = intended.last_updated;
    stored == *intended
}

#[async_trait]
impl JobRepository for SimpleJobRepository {
    async fn is_job_instance_exists(&self, job_name: &str, parameters: &JobParameters) -> Result<bool> {
        Ok(self.get_job_instance(job_name, parameters).await?.is_some())
    }

    async fn get_job_instance(&self, job_name: &str, parameters: &JobParameters) -> Result<Option<JobInstance>> {
        let key = parameters.identifying_signature();
        Ok(self
            .daos
            .instances
            .find(job_name, &key)
            .await?
            .map(|record| record.to_instance()))
    }

    async fn create_job_execution_with(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_rerun_completed: bool,
    ) -> Result<JobExecution> {
        let job_key = parameters.identifying_signature();
        let instance = match self.daos.instances.find(job_name, &job_key).await? {
            Some(instance) => instance,
            None => self.daos.instances.create(job_name, &job_key).await?,
        };

        let previous = self.daos.executions.find_by_instance(instance.id).await?;

        // Claimed by a launch that has not written its execution yet
        if let Some(last_id) = instance.last_execution_id {
            if !previous.iter().any(|execution| execution.id == last_id) {
                if !claim_is_stale(&instance) {
                    return Err(Self::already_running(job_name, instance.id));
                }
                warn!(
                    "Ignoring stale claim on instance {} for execution {} that was never written",
                    instance.id, last_id
                );
            }
        }

        for execution in &previous {
            match execution.status {
                status if status.is_running() => {
                    return Err(Self::already_running(job_name, instance.id));
                }
                BatchStatus::Completed if !allow_rerun_completed => {
                    return Err(Self::restart_not_allowed(
                        job_name,
                        format!(
                            "instance {} already completed successfully with these parameters",
                            instance.id
                        ),
                    ));
                }
                BatchStatus::Abandoned => {
                    return Err(Self::restart_not_allowed(
                        job_name,
                        format!("instance {} was abandoned", instance.id),
                    ));
                }
                BatchStatus::Unknown => {
                    return Err(Self::restart_not_allowed(
                        job_name,
                        format!(
                            "execution {} is in UNKNOWN state and may still be running",
                            execution.id
                        ),
                    ));
                }
                _ => {}
            }
        }

        let execution_id = self.daos.executions.next_id().await?;
        let claimed = match self.daos.instances.claim(&instance, execution_id).await {
            Ok(claimed) => claimed,
            Err(StorageError::VersionConflict { .. }) => {
                debug!("Lost the claim on instance {} to a concurrent launch", instance.id);
                return Err(Self::already_running(job_name, instance.id));
            }
            Err(other) => return Err(other.into()),
        };

        let mut execution = JobExecution::new(execution_id, claimed.to_instance(), parameters.clone());
        let inserted = self.insert_execution(&mut execution, previous.first()).await;
        if let Err(error) = inserted {
            self.release_claim(&claimed, instance.last_execution_id).await;
            return Err(error);
        }

        let saved = self
            .daos
            .contexts
            .save_changes(ContextOwner::Job(execution.id), &execution.execution_context)
            .await;
        if let Err(error) = saved {
            let error = BatchError::from(error);
            self.fail_unstarted(&mut execution, &error).await;
            return Err(error);
        }
        execution.execution_context.clear_dirty();

        info!(
            "Created job execution {} for job {} (instance {}, parameters [{}])",
            execution.id, job_name, claimed.id, parameters
        );
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        let expected = execution.version;
        execution.last_updated = Some(Utc::now());
        let mut record = JobExecutionRecord::from(&*execution);
        record.version = expected + 1;

        match self.daos.executions.replace(&record, expected).await {
            Ok(()) => {
                execution.version = record.version;
                Ok(())
            }
            Err(StorageError::VersionConflict { found, .. }) => {
                if let Some(stored) = self.daos.executions.get(execution.id).await? {
                    if same_job_write(&stored, &record) {
                        debug!("Job execution {} update already applied", execution.id);
                        execution.version = stored.version;
                        return Ok(());
                    }
                }
                warn!(
                    "Rejected stale update of job execution {}: version {} is behind {}",
                    execution.id, expected, found
                );
                Err(BatchError::ConcurrentModification {
                    entity: "JobExecution".to_string(),
                    id: execution.id.to_string(),
                    expected,
                    found,
                })
            }
            Err(StorageError::NotFound { .. }) => Err(BatchError::NoSuchJobExecution(execution.id)),
            Err(other) => Err(other.into()),
        }
    }

    async fn synchronize_status(&self, execution: &mut JobExecution) -> Result<()> {
        let stored = self
            .daos
            .executions
            .get(execution.id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(execution.id))?;

        if stored.version != execution.version {
            debug!(
                "Synchronizing job execution {}: stored status {} at version {}",
                execution.id, stored.status, stored.version
            );
            execution.upgrade_status(stored.status);
            execution.version = stored.version;
        }
        Ok(())
    }

    async fn add_step_execution(&self, step: &mut StepExecution) -> Result<()> {
        step.id = self.daos.steps.next_id().await?;
        step.version = 0;
        step.last_updated = Some(Utc::now());
        self.daos.steps.insert(&StepExecutionRecord::from(&*step)).await?;

        step.execution_context.mark_all_dirty();
        self.update_step_execution_context(step).await
    }

    async fn update_step_execution(&self, step: &mut StepExecution) -> Result<()> {
        let expected = step.version;
        step.last_updated = Some(Utc::now());
        let mut record = StepExecutionRecord::from(&*step);
        record.version = expected + 1;

        match self.daos.steps.replace(&record, expected).await {
            Ok(()) => {
                step.version = record.version;
                Ok(())
            }
            Err(StorageError::VersionConflict { found, .. }) => {
                if let Some(stored) = self.daos.steps.get(step.id).await? {
                    if same_step_write(&stored, &record) {
                        debug!("Step execution {} update already applied", step.id);
                        step.version = stored.version;
                        return Ok(());
                    }
                }
                warn!(
                    "Rejected stale update of step execution {}: version {} is behind {}",
                    step.id, expected, found
                );
                Err(BatchError::ConcurrentModification {
                    entity: "StepExecution".to_string(),
                    id: step.id.to_string(),
                    expected,
                    found,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn update_job_execution_context(&self, execution: &mut JobExecution) -> Result<()> {
        self.daos
            .contexts
            .save_changes(ContextOwner::Job(execution.id), &execution.execution_context)
            .await?;
        execution.execution_context.clear_dirty();
        Ok(())
    }

    async fn update_step_execution_context(&self, step: &mut StepExecution) -> Result<()> {
        self.daos
            .contexts
            .save_changes(ContextOwner::Step(step.id), &step.execution_context)
            .await?;
        step.execution_context.clear_dirty();
        Ok(())
    }

    async fn get_last_job_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>> {
        let latest = self
            .daos
            .executions
            .find_by_instance(instance.id)
            .await?
            .into_iter()
            .next();
        match latest {
            Some(record) => Ok(Some(self.daos.load_job_execution(record).await?)),
            None => Ok(None),
        }
    }

    async fn get_last_step_execution(&self, instance: &JobInstance, step_name: &str) -> Result<Option<StepExecution>> {
        let execution_ids = self.job_execution_ids(instance).await?;
        let latest = self
            .daos
            .steps
            .find_by_step_name(&execution_ids, step_name)
            .await?
            .into_iter()
            .next();
        match latest {
            Some(record) => Ok(Some(self.daos.load_step_execution(record).await?)),
            None => Ok(None),
        }
    }

    async fn get_step_execution_count(&self, instance: &JobInstance, step_name: &str) -> Result<u32> {
        let execution_ids = self.job_execution_ids(instance).await?;
        let steps = self.daos.steps.find_by_step_name(&execution_ids, step_name).await?;
        Ok(steps.len() as u32)
    }

    async fn get_last_completed_execution_id(&self, instance: &JobInstance) -> Result<Option<i64>> {
        Ok(self
            .daos
            .executions
            .find_by_instance(instance.id)
            .await?
            .iter()
            .find(|record| record.status == BatchStatus::Completed)
            .map(|record| record.id))
    }

    async fn get_job_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
        match self.daos.executions.get(execution_id).await? {
            Some(record) => Ok(Some(self.daos.load_job_execution(record).await?)),
            None => Ok(None),
        }
    }
}
