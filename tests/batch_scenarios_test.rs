//! End-to-end job lifecycle scenarios

mod common;

use batchwork_config::LaunchMode;
use batchwork_core::{
    BatchError, BatchStatus, ExitStatus, Job, JobParameters, JobParametersBuilder, SimpleJob,
};
use common::{base_config, batch_context, Journal, RecordingStep};
use std::sync::Arc;

fn load_orders(journal: &Arc<Journal>) -> (Arc<dyn Job>, [Arc<RecordingStep>; 3]) {
    let steps = [
        RecordingStep::new("extract", journal.clone()),
        RecordingStep::reading("transform", journal.clone(), "extract.rows"),
        RecordingStep::reading("load", journal.clone(), "transform.rows"),
    ];
    let job = SimpleJob::builder("load-orders")
        .step(steps[0].clone())
        .step(steps[1].clone())
        .step(steps[2].clone())
        .build();
    (Arc::new(job), steps)
}

#[tokio::test]
async fn test_load_orders_runs_three_steps() {
    let journal = Journal::new();
    let (job, _) = load_orders(&journal);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;

    let parameters = JobParameters::builder().add_long("runId", 1).build();
    let handle = context.operator.start("load-orders", parameters.clone()).await.unwrap();
    let execution = handle.execution();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status.exit_code, ExitStatus::COMPLETED);
    assert_eq!(journal.entries(), vec!["extract", "transform", "load"]);

    let stored = context
        .explorer
        .get_job_execution(execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
    assert!(stored.start_time.is_some() && stored.end_time.is_some());
    assert_eq!(stored.step_executions.len(), 3);
    assert!(stored
        .step_executions
        .iter()
        .all(|step| step.status == BatchStatus::Completed));
    assert_eq!(stored.execution_context.get_i64("load.rows"), Some(10));

    let instance = context
        .repository
        .get_job_instance("load-orders", &parameters)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.id, stored.job_instance.id);
    assert_eq!(context.explorer.get_job_instance_count("load-orders").await.unwrap(), 1);
}

#[tokio::test]
async fn test_parameter_order_does_not_change_instance() {
    let journal = Journal::new();
    let (job, _) = load_orders(&journal);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;

    let forward = JobParameters::builder()
        .add_long("runId", 7)
        .add_string("region", "eu-west")
        .add_double("threshold", 0.25)
        .build();
    let reversed = JobParameters::builder()
        .add_double("threshold", 0.25)
        .add_string("region", "eu-west")
        .add_long("runId", 7)
        .build();
    assert_eq!(forward.identifying_signature(), reversed.identifying_signature());

    context.operator.start("load-orders", forward).await.unwrap();
    let result = context.operator.start("load-orders", reversed.clone()).await;
    assert!(matches!(result, Err(BatchError::JobRestartNotAllowed { .. })));

    let instance = context
        .repository
        .get_job_instance("load-orders", &reversed)
        .await
        .unwrap();
    assert!(instance.is_some());
    assert_eq!(context.explorer.get_job_instance_count("load-orders").await.unwrap(), 1);
}

#[tokio::test]
async fn test_rerun_after_completion_is_not_allowed() {
    let journal = Journal::new();
    let (job, _) = load_orders(&journal);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;
    let parameters = JobParameters::builder().add_long("runId", 1).build();

    context.operator.start("load-orders", parameters.clone()).await.unwrap();
    journal.clear();

    let result = context.operator.start("load-orders", parameters).await;
    assert!(matches!(result, Err(BatchError::JobRestartNotAllowed { .. })));
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_rerun_allowed_when_job_permits_it() {
    let journal = Journal::new();
    let step = RecordingStep::new("extract", journal.clone());
    let job: Arc<dyn Job> = Arc::new(
        SimpleJob::builder("refresh-cache")
            .step(step)
            .allow_rerun_completed(true)
            .build(),
    );
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;

    let first = context.operator.start("refresh-cache", JobParameters::new()).await.unwrap();
    let second = context.operator.start("refresh-cache", JobParameters::new()).await.unwrap();

    assert_eq!(second.execution().status, BatchStatus::Completed);
    assert_eq!(first.execution().job_instance.id, second.execution().job_instance.id);
    // A completed instance runs from the first step again
    assert_eq!(journal.entries(), vec!["extract", "extract"]);
}

#[tokio::test]
async fn test_failing_step_halts_job() {
    let journal = Journal::new();
    let (job, steps) = load_orders(&journal);
    steps[1].set_failing(true);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;

    let parameters = JobParameters::builder().add_long("runId", 2).build();
    let handle = context.operator.start("load-orders", parameters).await.unwrap();
    let execution = handle.execution();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.exit_status.exit_code, ExitStatus::FAILED);
    assert_eq!(journal.entries(), vec!["extract", "transform"]);

    let stored_steps = context.explorer.get_step_executions(execution.id).await.unwrap();
    let statuses: Vec<(String, BatchStatus)> = stored_steps
        .iter()
        .map(|step| (step.step_name.clone(), step.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("extract".to_string(), BatchStatus::Completed),
            ("transform".to_string(), BatchStatus::Failed),
        ]
    );
    assert!(stored_steps[1].failure_exceptions[0].contains("could not process"));
}

#[tokio::test]
async fn test_restart_resumes_at_failed_step_with_context() {
    let journal = Journal::new();
    let (job, steps) = load_orders(&journal);
    steps[1].set_failing(true);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;

    let parameters = JobParametersBuilder::default().add_long("runId", 3).build();
    let failed = context.operator.start("load-orders", parameters).await.unwrap();
    assert_eq!(failed.execution().status, BatchStatus::Failed);

    journal.clear();
    steps[1].set_failing(false);
    let restarted = context.operator.restart(failed.id()).await.unwrap();
    let execution = restarted.execution();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.job_instance.id, failed.execution().job_instance.id);
    assert_ne!(execution.id, failed.id());
    assert_eq!(journal.entries(), vec!["transform", "load"]);
    // Step 2 saw what step 1 wrote before the failure
    assert_eq!(steps[1].observed(), Some(10));

    let executions = context
        .operator
        .get_executions(execution.job_instance.id)
        .await
        .unwrap();
    assert_eq!(executions, vec![execution.id, failed.id()]);
}

#[tokio::test]
async fn test_checkpoint_replay_and_stale_write() {
    let journal = Journal::new();
    let (job, _) = load_orders(&journal);
    let context = batch_context(base_config(LaunchMode::Sync), vec![job]).await;
    let repository = &context.repository;

    let mut execution = repository
        .create_job_execution("load-orders", &JobParameters::new())
        .await
        .unwrap();
    execution.mark_started();
    let snapshot = execution.clone();
    let snapshot_version = snapshot.version;

    repository.update_job_execution(&mut execution).await.unwrap();
    let first = repository.get_job_execution(execution.id).await.unwrap().unwrap();

    // Same write again from the same starting version
    let mut replay = snapshot.clone();
    repository.update_job_execution(&mut replay).await.unwrap();
    let second = repository.get_job_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(first.version, second.version);
    assert_eq!(first.status, second.status);
    assert_eq!(first.start_time, second.start_time);

    // A different write from the stale version is rejected
    let mut stale = snapshot;
    stale.status = BatchStatus::Stopping;
    let result = repository.update_job_execution(&mut stale).await;
    match result {
        Err(BatchError::ConcurrentModification { expected, found, .. }) => {
            assert_eq!(expected, snapshot_version);
            assert_eq!(found, first.version);
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }
    let after = repository.get_job_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(after.status, BatchStatus::Started);
}
