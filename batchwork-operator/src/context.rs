//! Startup wiring
//!
//! Everything the batch core needs is built here, once, from configuration.
//! Collaborators receive owned `Arc`s; there is no global registry of
//! services.

use anyhow::{Context, Result};
use batchwork_config::{BatchConfig, StorageRetryConfig};
use batchwork_execution::{JobLauncher, WorkerPool, WorkerPoolConfig};
use batchwork_registry::JobRegistry;
use batchwork_resilience::RetryPolicy;
use batchwork_storage::{
    DocumentStore, JobExplorer, JobRepository, SimpleJobExplorer, SimpleJobRepository, StoreClient,
};
use std::sync::Arc;
use tracing::info;

use crate::operator::JobOperator;

/// Container holding the wired batch services
#[derive(Clone)]
pub struct BatchContext {
    pub config: BatchConfig,
    /// Database holding application data, handed to job steps
    pub app_store: Arc<dyn DocumentStore>,
    /// Database holding job instances, executions and contexts
    pub batch_store: Arc<dyn DocumentStore>,
    pub registry: Arc<dyn JobRegistry>,
    pub repository: Arc<dyn JobRepository>,
    pub explorer: Arc<dyn JobExplorer>,
    pub launcher: Arc<JobLauncher>,
    pub operator: Arc<JobOperator>,
}

impl BatchContext {
    /// Validate `config`, resolve both databases through `client` and build
    /// the services on top of them
    pub async fn build(
        config: BatchConfig,
        client: &dyn StoreClient,
        registry: Arc<dyn JobRegistry>,
    ) -> Result<Self> {
        config.validate_all().context("invalid batch configuration")?;

        let app_store = client
            .database(&config.database.app_db_name)
            .with_context(|| format!("resolving app database '{}'", config.database.app_db_name))?;
        let batch_store = client
            .database(&config.database.batch_db_name)
            .with_context(|| format!("resolving batch database '{}'", config.database.batch_db_name))?;
        batch_store
            .health_check()
            .await
            .context("batch database is not reachable")?;

        let retry_policy = Self::retry_policy(&config.storage.retry);
        let repository: Arc<dyn JobRepository> =
            Arc::new(SimpleJobRepository::new(batch_store.clone(), retry_policy.clone()).await?);
        let explorer: Arc<dyn JobExplorer> =
            Arc::new(SimpleJobExplorer::new(batch_store.clone(), retry_policy));

        let pool = WorkerPool::new(WorkerPoolConfig::from(&config.execution));
        let launcher = Arc::new(JobLauncher::new(
            repository.clone(),
            pool,
            config.execution.launch_mode,
        ));
        let operator = Arc::new(JobOperator::new(
            registry.clone(),
            launcher.clone(),
            repository.clone(),
            explorer.clone(),
        ));

        info!(
            app_db = %config.database.app_db_name,
            batch_db = %config.database.batch_db_name,
            shared = config.database.is_shared(),
            core_pool_size = config.execution.core_pool_size,
            max_pool_size = config.execution.max_pool_size,
            "Batch context ready"
        );

        Ok(Self {
            config,
            app_store,
            batch_store,
            registry,
            repository,
            explorer,
            launcher,
            operator,
        })
    }

    pub fn retry_policy(config: &StorageRetryConfig) -> RetryPolicy {
        let mut policy = RetryPolicy::exponential(
            config.max_attempts,
            config.initial_delay(),
            config.max_delay(),
            config.backoff_multiplier,
        );
        policy.jitter = config.jitter;
        policy
    }

    /// Install the tracing subscriber described by the logging domain
    pub fn init_logging(&self) -> Result<()> {
        batchwork_logging::init_logging_from_config(&self.config.logging)
    }

    /// Stop accepting launches and wait for running executions to finish
    pub async fn shutdown(&self) {
        let pool = self.launcher.pool();
        pool.shutdown();
        pool.await_termination().await;
        info!("Batch context shut down");
    }
}
