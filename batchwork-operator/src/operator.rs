use batchwork_core::{BatchError, BatchStatus, ExitStatus, JobExecution, JobParameters, Result};
use batchwork_execution::{JobExecutionHandle, JobLauncher};
use batchwork_registry::JobRegistry;
use batchwork_storage::{JobExplorer, JobRepository};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at a status write before giving up on a racing engine
const STATUS_WRITE_ATTEMPTS: u32 = 5;

/// Facade over registry, launcher, repository and explorer
pub struct JobOperator {
    registry: Arc<dyn JobRegistry>,
    launcher: Arc<JobLauncher>,
    repository: Arc<dyn JobRepository>,
    explorer: Arc<dyn JobExplorer>,
}

impl JobOperator {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        launcher: Arc<JobLauncher>,
        repository: Arc<dyn JobRepository>,
        explorer: Arc<dyn JobExplorer>,
    ) -> Self {
        Self {
            registry,
            launcher,
            repository,
            explorer,
        }
    }

    /// Launch a registered job
    pub async fn start(&self, job_name: &str, parameters: JobParameters) -> Result<JobExecutionHandle> {
        let job = self.registry.get_job(job_name)?;
        info!(job_name, parameters = %parameters, "Starting job");
        self.launcher.run(job, parameters).await
    }

    /// Launch a new instance with parameters from the job's incrementer,
    /// applied to the parameters of the most recent instance
    pub async fn start_next_instance(&self, job_name: &str) -> Result<JobExecutionHandle> {
        let job = self.registry.get_job(job_name)?;
        let incrementer = job.incrementer().ok_or_else(|| {
            BatchError::InvalidParameters(format!("job {} has no parameters incrementer", job_name))
        })?;

        let previous = match self.explorer.get_last_job_instance(job_name).await? {
            Some(instance) => self
                .explorer
                .get_last_job_execution(&instance)
                .await?
                .map(|execution| execution.job_parameters),
            None => None,
        };
        let parameters = incrementer.get_next(previous.as_ref());
        info!(job_name, parameters = %parameters, "Starting next instance");
        self.launcher.run(job, parameters).await
    }

    /// Request a running execution to stop.
    ///
    /// A STARTING execution that no worker picked up yet goes straight to
    /// STOPPED; a STARTED one becomes STOPPING and the engine stops at its
    /// next checkpoint.
    pub async fn stop(&self, execution_id: i64) -> Result<()> {
        let mut attempt = 1;
        loop {
            let mut execution = self.load(execution_id).await?;
            match execution.status {
                BatchStatus::Stopping => return Ok(()),
                BatchStatus::Starting => {
                    execution.finish(
                        BatchStatus::Stopped,
                        ExitStatus::stopped().with_description("Stopped before start"),
                    );
                }
                BatchStatus::Started => execution.status = BatchStatus::Stopping,
                status => {
                    return Err(BatchError::JobExecutionNotRunning {
                        execution_id,
                        status: status.to_string(),
                    })
                }
            }

            match self.repository.update_job_execution(&mut execution).await {
                Ok(()) => {
                    info!(execution_id, status = %execution.status, "Stop requested");
                    return Ok(());
                }
                Err(BatchError::ConcurrentModification { .. }) if attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(execution_id, attempt, "Execution changed while stopping, reloading");
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Run the instance of a failed or stopped execution again; the new
    /// execution resumes from the persisted contexts
    pub async fn restart(&self, execution_id: i64) -> Result<JobExecutionHandle> {
        let execution = self.load(execution_id).await?;
        let job = self.registry.get_job(execution.job_name())?;

        match execution.status {
            BatchStatus::Completed if !job.allow_rerun_completed() => {
                return Err(BatchError::JobInstanceAlreadyComplete {
                    job_name: execution.job_name().to_string(),
                    instance_id: execution.job_instance.id,
                });
            }
            status if status.is_running() => {
                return Err(BatchError::JobInstanceAlreadyRunning {
                    job_name: execution.job_name().to_string(),
                    instance_id: execution.job_instance.id,
                });
            }
            _ => {}
        }
        if !job.is_restartable() {
            return Err(BatchError::JobRestartNotAllowed {
                job_name: execution.job_name().to_string(),
                reason: "job is not restartable".to_string(),
            });
        }

        info!(execution_id, job_name = execution.job_name(), "Restarting execution");
        self.launcher.run(job, execution.job_parameters).await
    }

    /// Mark an execution that is not running ABANDONED so its instance is
    /// never restarted
    pub async fn abandon(&self, execution_id: i64) -> Result<JobExecution> {
        let mut attempt = 1;
        loop {
            let mut execution = self.load(execution_id).await?;
            if matches!(execution.status, BatchStatus::Starting | BatchStatus::Started) {
                return Err(BatchError::JobInstanceAlreadyRunning {
                    job_name: execution.job_name().to_string(),
                    instance_id: execution.job_instance.id,
                });
            }
            if execution.status == BatchStatus::Abandoned {
                return Ok(execution);
            }

            execution.upgrade_status(BatchStatus::Abandoned);
            match self.repository.update_job_execution(&mut execution).await {
                Ok(()) => {
                    warn!(execution_id, "Execution abandoned");
                    return Ok(execution);
                }
                Err(BatchError::ConcurrentModification { .. }) if attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(execution_id, attempt, "Execution changed while abandoning, reloading");
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Ids of the running executions of a job
    pub async fn get_running_executions(&self, job_name: &str) -> Result<Vec<i64>> {
        let running = self.explorer.find_running_job_executions(job_name).await?;
        if running.is_empty() {
            self.ensure_job_known(job_name).await?;
        }
        Ok(running.into_iter().map(|execution| execution.id).collect())
    }

    /// One-line summary of an execution
    pub async fn get_summary(&self, execution_id: i64) -> Result<String> {
        Ok(self.load(execution_id).await?.to_string())
    }

    /// Summaries of the step executions, keyed by step execution id
    pub async fn get_step_execution_summaries(&self, execution_id: i64) -> Result<BTreeMap<i64, String>> {
        let execution = self.load(execution_id).await?;
        Ok(execution
            .step_executions
            .iter()
            .map(|step| (step.id, step.summary()))
            .collect())
    }

    /// Parameters of an execution in `key(type)=value` form
    pub async fn get_parameters(&self, execution_id: i64) -> Result<String> {
        Ok(self.load(execution_id).await?.job_parameters.to_string())
    }

    /// Registered job names
    pub fn get_job_names(&self) -> Vec<String> {
        self.registry.job_names()
    }

    /// Instance ids of a job, newest first
    pub async fn get_job_instances(&self, job_name: &str, start: usize, count: usize) -> Result<Vec<i64>> {
        let instances = self.explorer.get_job_instances(job_name, start, count).await?;
        if instances.is_empty() {
            self.ensure_job_known(job_name).await?;
        }
        Ok(instances.into_iter().map(|instance| instance.id).collect())
    }

    /// Execution ids of an instance, newest first
    pub async fn get_executions(&self, instance_id: i64) -> Result<Vec<i64>> {
        let instance = self
            .explorer
            .get_job_instance(instance_id)
            .await?
            .ok_or(BatchError::NoSuchJobInstance(instance_id))?;
        let executions = self.explorer.get_job_executions(&instance).await?;
        Ok(executions.into_iter().map(|execution| execution.id).collect())
    }

    async fn load(&self, execution_id: i64) -> Result<JobExecution> {
        self.explorer
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(execution_id))
    }

    async fn ensure_job_known(&self, job_name: &str) -> Result<()> {
        if self.registry.contains(job_name) {
            return Ok(());
        }
        let stored = self.explorer.get_job_names().await?;
        if stored.iter().any(|name| name == job_name) {
            Ok(())
        } else {
            Err(BatchError::NoSuchJob(job_name.to_string()))
        }
    }
}
