//! Concurrent launches and worker pool limits

mod common;

use async_trait::async_trait;
use batchwork_config::LaunchMode;
use batchwork_core::{
    BatchError, BatchStatus, ChunkContext, Job, JobParameters, RepeatStatus, SimpleJob, Step,
};
use common::{base_config, batch_context};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Holds a permit for the whole step and tracks how many run at once
#[derive(Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

struct GatedStep {
    gate: Arc<Semaphore>,
    occupancy: Arc<Occupancy>,
}

#[async_trait]
impl Step for GatedStep {
    fn name(&self) -> &str {
        "wait-for-gate"
    }

    async fn execute(&self, _context: &mut ChunkContext<'_>) -> anyhow::Result<RepeatStatus> {
        let now = self.occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(now, Ordering::SeqCst);
        self.occupancy.started.fetch_add(1, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        self.occupancy.active.fetch_sub(1, Ordering::SeqCst);
        permit?.forget();
        Ok(RepeatStatus::Finished)
    }
}

fn gated_job(gate: Arc<Semaphore>, occupancy: Arc<Occupancy>) -> Arc<dyn Job> {
    Arc::new(
        SimpleJob::builder("sync-inventory")
            .step(Arc::new(GatedStep { gate, occupancy }))
            .build(),
    )
}

async fn wait_for_started(occupancy: &Occupancy, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while occupancy.started.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("steps did not start in time");
}

#[tokio::test]
async fn test_concurrent_launches_create_one_execution() {
    let gate = Arc::new(Semaphore::new(0));
    let occupancy = Arc::new(Occupancy::default());
    let context = batch_context(
        base_config(LaunchMode::Async),
        vec![gated_job(gate.clone(), occupancy.clone())],
    )
    .await;
    let parameters = JobParameters::builder().add_long("runId", 1).build();

    let (first, second) = tokio::join!(
        context.operator.start("sync-inventory", parameters.clone()),
        context.operator.start("sync-inventory", parameters.clone()),
    );

    let (winner, loser) = match (first, second) {
        (Ok(handle), Err(error)) | (Err(error), Ok(handle)) => (handle, error),
        (first, second) => panic!(
            "expected exactly one launch to win: {:?} / {:?}",
            first.map(|h| h.id()),
            second.map(|h| h.id())
        ),
    };
    assert!(matches!(loser, BatchError::JobInstanceAlreadyRunning { .. }));

    let instance = context
        .repository
        .get_job_instance("sync-inventory", &parameters)
        .await
        .unwrap()
        .unwrap();
    let executions = context.operator.get_executions(instance.id).await.unwrap();
    assert_eq!(executions, vec![winner.id()]);

    gate.add_permits(1);
    let finished = winner.wait().await.unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_pool_limits_concurrent_executions() {
    let gate = Arc::new(Semaphore::new(0));
    let occupancy = Arc::new(Occupancy::default());
    let mut config = base_config(LaunchMode::Async);
    config.execution.core_pool_size = 2;
    config.execution.max_pool_size = 2;
    config.execution.queue_capacity = 8;
    let context = batch_context(config, vec![gated_job(gate.clone(), occupancy.clone())]).await;

    let mut handles = Vec::new();
    for run_id in 1..=3 {
        let parameters = JobParameters::builder().add_long("runId", run_id).build();
        handles.push(context.operator.start("sync-inventory", parameters).await.unwrap());
    }

    wait_for_started(&occupancy, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(occupancy.started.load(Ordering::SeqCst), 2);

    let stats = context.launcher.pool().stats();
    assert_eq!(stats.workers, 2);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.queued, 1);

    let running = context.operator.get_running_executions("sync-inventory").await.unwrap();
    assert_eq!(running.len(), 3);
    let waiting = context
        .explorer
        .get_job_execution(handles[2].id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(waiting.status, BatchStatus::Starting);

    gate.add_permits(3);
    for handle in handles {
        assert_eq!(handle.wait().await.unwrap().status, BatchStatus::Completed);
    }
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 2);
    assert_eq!(context.launcher.pool().stats().peak_active, 2);

    context.shutdown().await;
    assert!(context.launcher.pool().is_shutdown());
}
