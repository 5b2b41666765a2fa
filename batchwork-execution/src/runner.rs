//! Execution engine
//!
//! Drives one job execution through its steps. Steps run in declaration
//! order on the calling task; each chunk a step processes ends in a
//! checkpoint that persists the step execution, both execution contexts and
//! picks up status changes made by an operator (a stop request).

use batchwork_core::{
    BatchError, BatchStatus, ChunkContext, ExitStatus, FlowAction, Job, JobExecution,
    RepeatStatus, Result, Step, StepExecution,
};
use batchwork_storage::JobRepository;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Runs job executions against a repository
pub struct JobRunner {
    repository: Arc<dyn JobRepository>,
}

fn stop_requested(status: BatchStatus) -> bool {
    matches!(status, BatchStatus::Stopping | BatchStatus::Stopped)
}

/// A completed step is skipped on restart, unless it completed as part of
/// a run that finished the whole instance
fn is_already_complete(step: &dyn Step, last: &StepExecution, completed_run: Option<i64>) -> bool {
    if last.status != BatchStatus::Completed || step.allow_start_if_complete() {
        return false;
    }
    completed_run.map_or(true, |completed| last.job_execution_id > completed)
}

impl JobRunner {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Run `execution` to a terminal status.
    ///
    /// Step failures are recorded on the execution and are not errors. An
    /// `Err` means the engine itself could not continue (storage outage, lost
    /// update, start limit); the execution is then marked FAILED as far as
    /// the store allows.
    pub async fn run(&self, job: &dyn Job, execution: &mut JobExecution) -> Result<()> {
        let span = tracing::info_span!(
            "job_execution",
            job_name = %execution.job_name(),
            execution_id = execution.id
        );
        async move {
            match self.execute(job, execution).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    self.abort(execution, &error).await;
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &dyn Job, execution: &mut JobExecution) -> Result<()> {
        self.repository.synchronize_status(execution).await?;
        if stop_requested(execution.status) {
            info!("Job execution stopped before it started");
            execution.finish(
                BatchStatus::Stopped,
                ExitStatus::stopped().with_description("Stopped before start"),
            );
            return self.save_final(execution).await;
        }

        execution.mark_started();
        self.save_progress(execution).await?;
        info!(status = %execution.status, parameters = %execution.job_parameters, "Job execution started");

        for listener in job.listeners() {
            listener.before_job(execution).await;
        }

        let (status, exit_status) = self.execute_steps(job, execution).await?;
        execution.finish(status, exit_status);

        for listener in job.listeners() {
            listener.after_job(execution).await;
        }

        self.repository.update_job_execution_context(execution).await?;
        self.save_final(execution).await?;
        info!(
            status = %execution.status,
            exit_code = %execution.exit_status.exit_code,
            "Job execution finished"
        );
        Ok(())
    }

    async fn execute_steps(
        &self,
        job: &dyn Job,
        execution: &mut JobExecution,
    ) -> Result<(BatchStatus, ExitStatus)> {
        // Steps that completed up to here belong to a finished run of the
        // instance and run again
        let completed_run = self
            .repository
            .get_last_completed_execution_id(&execution.job_instance)
            .await?;

        for step in job.steps() {
            if stop_requested(execution.status) {
                info!(step_name = step.name(), "Stop requested, not starting step");
                return Ok((BatchStatus::Stopped, ExitStatus::stopped()));
            }

            let Some(step_execution) = self.execute_step(step.as_ref(), execution, completed_run).await? else {
                continue;
            };

            let action = job.transitions().next_action(
                step.name(),
                step_execution.status,
                &step_execution.exit_status,
            );
            let step_exit = step_execution.exit_status.clone();
            execution.step_executions.push(step_execution);

            match action {
                FlowAction::Continue => {}
                FlowAction::Fail => {
                    return Ok((BatchStatus::Failed, step_exit.and(&ExitStatus::failed())));
                }
                FlowAction::Stop => {
                    return Ok((BatchStatus::Stopped, step_exit.and(&ExitStatus::stopped())));
                }
                FlowAction::Complete => {
                    debug!(step_name = step.name(), "Transition ends job early");
                    return Ok((BatchStatus::Completed, ExitStatus::completed()));
                }
            }
        }
        Ok((BatchStatus::Completed, ExitStatus::completed()))
    }

    /// Run one step; `None` when it completed in an earlier execution of
    /// the same instance
    async fn execute_step(
        &self,
        step: &dyn Step,
        execution: &mut JobExecution,
        completed_run: Option<i64>,
    ) -> Result<Option<StepExecution>> {
        let step_name = step.name();
        let instance = execution.job_instance.clone();

        let last = self.repository.get_last_step_execution(&instance, step_name).await?;
        if let Some(last) = &last {
            if is_already_complete(step, last, completed_run) {
                info!(step_name, "Step already complete in an earlier execution, skipping");
                return Ok(None);
            }
        }

        let count = self
            .repository
            .get_step_execution_count(&instance, step_name)
            .await?;
        if count >= step.start_limit() {
            return Err(BatchError::StartLimitExceeded {
                step_name: step_name.to_string(),
                limit: step.start_limit(),
            });
        }

        let mut step_execution = StepExecution::new(step_name, execution.id);
        if let Some(last) = last {
            if last.status != BatchStatus::Completed {
                debug!(step_name, previous = last.id, "Restoring step context");
                step_execution.execution_context = last.execution_context;
            }
        }
        self.repository.add_step_execution(&mut step_execution).await?;

        step_execution.mark_started();
        if let Err(error) = self.repository.update_step_execution(&mut step_execution).await {
            return Err(self.fail_step(&mut step_execution, error).await);
        }
        info!(step_name, step_execution_id = step_execution.id, "Executing step");

        loop {
            let result = {
                let mut chunk = ChunkContext {
                    step_execution: &mut step_execution,
                    job_parameters: &execution.job_parameters,
                    job_context: &mut execution.execution_context,
                };
                step.execute(&mut chunk).await
            };

            match result {
                Ok(repeat) => {
                    step_execution.commit_count += 1;
                    if repeat == RepeatStatus::Finished {
                        step_execution.finish(BatchStatus::Completed, ExitStatus::completed());
                    }
                    if let Err(error) = self.checkpoint(execution, &mut step_execution).await {
                        return Err(self.fail_step(&mut step_execution, error).await);
                    }
                    if repeat == RepeatStatus::Finished {
                        break;
                    }
                    if stop_requested(execution.status) {
                        info!(step_name, "Stop request observed at checkpoint");
                        step_execution.set_terminate_only();
                        step_execution.finish(BatchStatus::Stopped, ExitStatus::stopped());
                        if let Err(error) = self.repository.update_step_execution(&mut step_execution).await {
                            return Err(self.fail_step(&mut step_execution, error).await);
                        }
                        break;
                    }
                }
                Err(cause) => {
                    warn!(step_name, error = %format!("{cause:#}"), "Step failed");
                    step_execution.rollback_count += 1;
                    step_execution.add_failure(format!("{cause:#}"));
                    step_execution.finish(
                        BatchStatus::Failed,
                        ExitStatus::failed().with_description(&cause.to_string()),
                    );
                    if let Err(error) = self.repository.update_step_execution(&mut step_execution).await {
                        return Err(self.fail_step(&mut step_execution, error).await);
                    }
                    break;
                }
            }
        }

        info!(
            step_name,
            status = %step_execution.status,
            read_count = step_execution.read_count,
            write_count = step_execution.write_count,
            "Step finished"
        );
        Ok(Some(step_execution))
    }

    async fn checkpoint(&self, execution: &mut JobExecution, step_execution: &mut StepExecution) -> Result<()> {
        self.repository.update_step_execution(step_execution).await?;
        self.repository.update_step_execution_context(step_execution).await?;
        self.repository.update_job_execution_context(execution).await?;
        self.repository.synchronize_status(execution).await
    }

    /// Write an in-flight status, adopting a concurrent stop request
    async fn save_progress(&self, execution: &mut JobExecution) -> Result<()> {
        match self.repository.update_job_execution(execution).await {
            Err(BatchError::ConcurrentModification { .. }) => {
                self.repository.synchronize_status(execution).await?;
                self.repository.update_job_execution(execution).await
            }
            other => other,
        }
    }

    /// Write a terminal status; it wins over a stop request that raced it
    async fn save_final(&self, execution: &mut JobExecution) -> Result<()> {
        match self.repository.update_job_execution(execution).await {
            Err(BatchError::ConcurrentModification { .. }) => {
                let status = execution.status;
                let exit_status = execution.exit_status.clone();
                self.repository.synchronize_status(execution).await?;
                execution.status = status;
                execution.exit_status = exit_status;
                self.repository.update_job_execution(execution).await
            }
            other => other,
        }
    }

    async fn fail_step(&self, step_execution: &mut StepExecution, error: BatchError) -> BatchError {
        step_execution.add_failure(error.to_string());
        step_execution.finish(
            BatchStatus::Failed,
            ExitStatus::failed().with_description(&error.to_string()),
        );
        if let Err(update_error) = self.repository.update_step_execution(step_execution).await {
            error!(
                step_execution_id = step_execution.id,
                error = %update_error,
                "Could not record step failure"
            );
        }
        error
    }

    async fn abort(&self, execution: &mut JobExecution, error: &BatchError) {
        error!(error = %error, "Job execution aborted");
        execution.add_failure(error.to_string());
        execution.finish(
            BatchStatus::Failed,
            ExitStatus::failed().with_description(&error.to_string()),
        );
        if let Err(update_error) = self.save_final(execution).await {
            error!(error = %update_error, "Could not record FAILED status");
        }
    }
}
