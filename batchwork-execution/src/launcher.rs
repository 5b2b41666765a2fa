//! Job launcher
//!
//! Creates the job execution through the repository and hands it to the
//! worker pool. In async mode `run` returns as soon as the pool accepted the
//! execution; in sync mode it returns once the execution is finished.

use batchwork_config::LaunchMode;
use batchwork_core::{BatchError, BatchStatus, ExitStatus, Job, JobExecution, JobParameters, Result};
use batchwork_storage::JobRepository;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::pool::WorkerPool;
use crate::runner::JobRunner;

/// A launched execution
pub struct JobExecutionHandle {
    execution: JobExecution,
    completion: Option<oneshot::Receiver<JobExecution>>,
    repository: Arc<dyn JobRepository>,
}

impl JobExecutionHandle {
    /// State of the execution when `run` returned
    pub fn execution(&self) -> &JobExecution {
        &self.execution
    }

    pub fn id(&self) -> i64 {
        self.execution.id
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_none()
    }

    /// Wait for the execution to reach a terminal status
    pub async fn wait(self) -> Result<JobExecution> {
        let Some(completion) = self.completion else {
            return Ok(self.execution);
        };
        match completion.await {
            Ok(finished) => Ok(finished),
            Err(_) => {
                // The worker dropped the execution; the store has the last word
                warn!(execution_id = self.execution.id, "Lost completion signal, reloading execution");
                self.repository
                    .get_job_execution(self.execution.id)
                    .await?
                    .ok_or(BatchError::NoSuchJobExecution(self.execution.id))
            }
        }
    }
}

/// Launches jobs onto a worker pool
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    runner: Arc<JobRunner>,
    pool: WorkerPool,
    mode: LaunchMode,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>, pool: WorkerPool, mode: LaunchMode) -> Self {
        Self {
            runner: Arc::new(JobRunner::new(repository.clone())),
            repository,
            pool,
            mode,
        }
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Launch `job` with `parameters`.
    ///
    /// Validation, restartability and repository failures are returned to the
    /// caller before anything is submitted.
    pub async fn run(&self, job: Arc<dyn Job>, parameters: JobParameters) -> Result<JobExecutionHandle> {
        if let Some(validator) = job.validator() {
            validator.validate(&parameters)?;
        }

        if !job.is_restartable() {
            if let Some(instance) = self.repository.get_job_instance(job.name(), &parameters).await? {
                if self.repository.get_last_job_execution(&instance).await?.is_some() {
                    return Err(BatchError::JobRestartNotAllowed {
                        job_name: job.name().to_string(),
                        reason: format!("instance {} already exists and is not restartable", instance.id),
                    });
                }
            }
        }

        let execution = self
            .repository
            .create_job_execution_with(job.name(), &parameters, job.allow_rerun_completed())
            .await?;
        info!(
            job_name = job.name(),
            execution_id = execution.id,
            mode = ?self.mode,
            "Launching job"
        );

        let (tx, rx) = oneshot::channel();
        let runner = self.runner.clone();
        let mut running = execution.clone();
        let task_job = job.clone();
        let task = async move {
            if let Err(error) = runner.run(task_job.as_ref(), &mut running).await {
                error!(execution_id = running.id, error = %error, "Job execution ended abnormally");
            }
            let _ = tx.send(running);
        };

        if let Err(pool_error) = self.pool.submit(task).await {
            warn!(execution_id = execution.id, error = %pool_error, "Worker pool refused execution");
            self.mark_rejected(execution, &pool_error.to_string()).await;
            return Err(pool_error.into());
        }

        let handle = JobExecutionHandle {
            execution,
            completion: Some(rx),
            repository: self.repository.clone(),
        };

        match self.mode {
            LaunchMode::Async => Ok(handle),
            LaunchMode::Sync => {
                let finished = handle.wait().await?;
                Ok(JobExecutionHandle {
                    execution: finished,
                    completion: None,
                    repository: self.repository.clone(),
                })
            }
        }
    }

    async fn mark_rejected(&self, mut execution: JobExecution, reason: &str) {
        execution.add_failure(reason);
        execution.finish(BatchStatus::Failed, ExitStatus::failed().with_description(reason));
        if let Err(update_error) = self.repository.update_job_execution(&mut execution).await {
            error!(
                execution_id = execution.id,
                error = %update_error,
                "Could not mark rejected execution FAILED"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPoolConfig;
    use async_trait::async_trait;
    use batchwork_config::RejectionPolicy;
    use batchwork_core::{
        ChunkContext, DefaultJobParametersValidator, RepeatStatus, SimpleJob, Step,
    };
    use batchwork_resilience::RetryPolicy;
    use batchwork_storage::{InMemoryDocumentStore, SimpleJobRepository};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct GatedStep {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Step for GatedStep {
        fn name(&self) -> &str {
            "gated"
        }

        async fn execute(&self, _context: &mut ChunkContext<'_>) -> anyhow::Result<RepeatStatus> {
            let _permit = self.gate.acquire().await?;
            Ok(RepeatStatus::Finished)
        }
    }

    fn pool(core: usize, max: usize, queue: usize, policy: RejectionPolicy) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            core_pool_size: core,
            max_pool_size: max,
            queue_capacity: queue,
            keep_alive: Duration::from_secs(1),
            rejection_policy: policy,
        })
    }

    async fn repository() -> Arc<dyn JobRepository> {
        let store = Arc::new(InMemoryDocumentStore::new("batch"));
        Arc::new(SimpleJobRepository::new(store, RetryPolicy::no_retry()).await.unwrap())
    }

    fn gated_job(name: &str, gate: Arc<Semaphore>) -> Arc<dyn Job> {
        Arc::new(SimpleJob::builder(name).step(Arc::new(GatedStep { gate })).build())
    }

    #[tokio::test]
    async fn test_sync_mode_returns_finished_execution() {
        let launcher = JobLauncher::new(repository().await, pool(1, 1, 4, RejectionPolicy::Block), LaunchMode::Sync);
        let job = gated_job("load-orders", Arc::new(Semaphore::new(1)));

        let handle = launcher.run(job, JobParameters::new()).await.unwrap();
        assert!(handle.is_finished());
        assert_eq!(handle.execution().status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_async_mode_returns_immediately() {
        let gate = Arc::new(Semaphore::new(0));
        let launcher = JobLauncher::new(repository().await, pool(1, 1, 4, RejectionPolicy::Block), LaunchMode::Async);

        let handle = launcher
            .run(gated_job("load-orders", gate.clone()), JobParameters::new())
            .await
            .unwrap();
        assert_eq!(handle.execution().status, BatchStatus::Starting);

        gate.add_permits(1);
        let finished = handle.wait().await.unwrap();
        assert_eq!(finished.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_rejected_before_creation() {
        let repository = repository().await;
        let launcher = JobLauncher::new(repository.clone(), pool(1, 1, 4, RejectionPolicy::Block), LaunchMode::Sync);
        let job: Arc<dyn Job> = Arc::new(
            SimpleJob::builder("load-orders")
                .validator(DefaultJobParametersValidator::new(["runId"], Vec::<String>::new()))
                .build(),
        );

        let result = launcher.run(job, JobParameters::new()).await;
        assert!(matches!(result, Err(BatchError::InvalidParameters(_))));
        assert!(!repository
            .is_job_instance_exists("load-orders", &JobParameters::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_non_restartable_job_cannot_run_twice() {
        let launcher = JobLauncher::new(repository().await, pool(1, 1, 4, RejectionPolicy::Block), LaunchMode::Sync);
        let job: Arc<dyn Job> = Arc::new(
            SimpleJob::builder("once")
                .restartable(false)
                .allow_rerun_completed(true)
                .build(),
        );

        launcher.run(job.clone(), JobParameters::new()).await.unwrap();
        let result = launcher.run(job, JobParameters::new()).await;
        assert!(matches!(result, Err(BatchError::JobRestartNotAllowed { .. })));
    }

    #[tokio::test]
    async fn test_rejected_submission_marks_execution_failed() {
        let repository = repository().await;
        let gate = Arc::new(Semaphore::new(0));
        let launcher = JobLauncher::new(repository.clone(), pool(1, 1, 1, RejectionPolicy::Reject), LaunchMode::Async);

        for run_id in 1..=2 {
            let parameters = JobParameters::builder().add_long("runId", run_id).build();
            launcher.run(gated_job("load-orders", gate.clone()), parameters).await.unwrap();
        }

        let parameters = JobParameters::builder().add_long("runId", 3).build();
        let result = launcher
            .run(gated_job("load-orders", gate.clone()), parameters.clone())
            .await;
        assert!(matches!(result, Err(BatchError::TaskRejected(_))));

        let instance = repository
            .get_job_instance("load-orders", &parameters)
            .await
            .unwrap()
            .unwrap();
        let rejected = repository.get_last_job_execution(&instance).await.unwrap().unwrap();
        assert_eq!(rejected.status, BatchStatus::Failed);

        gate.add_permits(2);
    }
}
