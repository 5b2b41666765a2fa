//! Read-only queries over batch metadata for monitoring and operator tools

use async_trait::async_trait;
use batchwork_core::{BatchError, JobExecution, JobInstance, Result, StepExecution};
use batchwork_resilience::RetryPolicy;
use std::sync::Arc;

use crate::dao::BatchDaos;
use crate::document::DocumentStore;

/// Read-only access to instances and executions. Never writes.
#[async_trait]
pub trait JobExplorer: Send + Sync {
    /// Names of all jobs that have at least one instance
    async fn get_job_names(&self) -> Result<Vec<String>>;

    async fn get_job_instance(&self, instance_id: i64) -> Result<Option<JobInstance>>;

    /// A page of instances of the job, newest first
    async fn get_job_instances(&self, job_name: &str, start: usize, count: usize) -> Result<Vec<JobInstance>>;

    async fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>>;

    /// Fails with `NoSuchJob` if the job never ran
    async fn get_job_instance_count(&self, job_name: &str) -> Result<usize>;

    /// Executions of the instance, newest first
    async fn get_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>>;

    async fn get_last_job_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>>;

    async fn get_job_execution(&self, execution_id: i64) -> Result<Option<JobExecution>>;

    async fn get_step_execution(&self, job_execution_id: i64, step_execution_id: i64) -> Result<Option<StepExecution>>;

    /// Steps of one job execution in the order they ran
    async fn get_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>>;

    /// Executions of the job that are starting, started or stopping
    async fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>>;
}

/// [`JobExplorer`] over a [`DocumentStore`]
#[derive(Debug, Clone)]
pub struct SimpleJobExplorer {
    daos: BatchDaos,
}

impl SimpleJobExplorer {
    pub fn new(store: Arc<dyn DocumentStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            daos: BatchDaos::new(store, retry_policy),
        }
    }
}

#[async_trait]
impl JobExplorer for SimpleJobExplorer {
    async fn get_job_names(&self) -> Result<Vec<String>> {
        Ok(self.daos.instances.job_names().await?)
    }

    async fn get_job_instance(&self, instance_id: i64) -> Result<Option<JobInstance>> {
        Ok(self
            .daos
            .instances
            .get(instance_id)
            .await?
            .map(|record| record.to_instance()))
    }

    async fn get_job_instances(&self, job_name: &str, start: usize, count: usize) -> Result<Vec<JobInstance>> {
        Ok(self
            .daos
            .instances
            .find_by_name(job_name)
            .await?
            .iter()
            .skip(start)
            .take(count)
            .map(|record| record.to_instance())
            .collect())
    }

    async fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>> {
        Ok(self.get_job_instances(job_name, 0, 1).await?.into_iter().next())
    }

    async fn get_job_instance_count(&self, job_name: &str) -> Result<usize> {
        match self.daos.instances.find_by_name(job_name).await?.len() {
            0 => Err(BatchError::NoSuchJob(job_name.to_string())),
            count => Ok(count),
        }
    }

    async fn get_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>> {
        let mut executions = Vec::new();
        for record in self.daos.executions.find_by_instance(instance.id).await? {
            executions.push(self.daos.load_job_execution(record).await?);
        }
        Ok(executions)
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

    async fn get_job_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
        match self.daos.executions.get(execution_id).await? {
            Some(record) => Ok(Some(self.daos.load_job_execution(record).await?)),
            None => Ok(None),
        }
    }

    async fn get_step_execution(&self, job_execution_id: i64, step_execution_id: i64) -> Result<Option<StepExecution>> {
        match self.daos.steps.get(step_execution_id).await? {
            Some(record) if record.job_execution_id == job_execution_id => {
                Ok(Some(self.daos.load_step_execution(record).await?))
            }
            _ => Ok(None),
        }
    }

    async fn get_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>> {
        let mut steps = Vec::new();
        for record in self.daos.steps.find_by_job_execution(job_execution_id).await? {
            steps.push(self.daos.load_step_execution(record).await?);
        }
        Ok(steps)
    }

    async fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        let mut executions = Vec::new();
        for record in self.daos.executions.find_running(job_name).await? {
            executions.push(self.daos.load_job_execution(record).await?);
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use crate::repository::{JobRepository, SimpleJobRepository};
    use batchwork_core::{BatchStatus, ExitStatus, JobParameters};

    async fn fixture() -> (SimpleJobRepository, SimpleJobExplorer) {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new("batch"));
        let repository = SimpleJobRepository::new(store.clone(), RetryPolicy::no_retry())
            .await
            .unwrap();
        let explorer = SimpleJobExplorer::new(store, RetryPolicy::no_retry());
        (repository, explorer)
    }

    fn run(run_id: i64) -> JobParameters {
        JobParameters::builder().add_long("run.id", run_id).build()
    }

    #[tokio::test]
    async fn test_instances_are_paged_newest_first() {
        let (repository, explorer) = fixture().await;
        for run_id in 1..=3 {
            repository.create_job_execution("load-orders", &run(run_id)).await.unwrap();
        }
        repository.create_job_execution("ship-orders", &run(1)).await.unwrap();

        let page = explorer.get_job_instances("load-orders", 0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].id > page[1].id);

        let rest = explorer.get_job_instances("load-orders", 2, 10).await.unwrap();
        assert_eq!(rest.len(), 1);

        assert_eq!(explorer.get_job_instance_count("load-orders").await.unwrap(), 3);
        assert!(matches!(
            explorer.get_job_instance_count("unknown").await,
            Err(BatchError::NoSuchJob(_))
        ));
        assert_eq!(
            explorer.get_job_names().await.unwrap(),
            vec!["load-orders".to_string(), "ship-orders".to_string()]
        );
        assert_eq!(
            explorer.get_last_job_instance("load-orders").await.unwrap().map(|i| i.id),
            Some(page[0].id)
        );
    }

    #[tokio::test]
    async fn test_running_executions_and_steps() {
        let (repository, explorer) = fixture().await;
        let running = repository.create_job_execution("load-orders", &run(1)).await.unwrap();
        let mut finished = repository.create_job_execution("load-orders", &run(2)).await.unwrap();
        finished.finish(BatchStatus::Completed, ExitStatus::completed());
        repository.update_job_execution(&mut finished).await.unwrap();

        let found = explorer.find_running_job_executions("load-orders").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);

        let mut step = StepExecution::new("extract", running.id);
        repository.add_step_execution(&mut step).await.unwrap();

        let steps = explorer.get_step_executions(running.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(explorer
            .get_step_execution(running.id, step.id)
            .await
            .unwrap()
            .is_some());
        assert!(explorer
            .get_step_execution(finished.id, step.id)
            .await
            .unwrap()
            .is_none());

        let executions = explorer.get_job_executions(&running.job_instance).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert!(explorer.get_job_execution(9999).await.unwrap().is_none());
    }
}
