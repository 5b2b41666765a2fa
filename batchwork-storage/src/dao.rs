//! Data access objects, one per collection
//!
//! Each DAO goes through [`StoreAccess`], which retries transient connection
//! failures with backoff and turns exhausted retries into
//! `StorageError::Unavailable`. Logic failures (duplicates, version
//! conflicts) pass through on the first attempt.

use batchwork_core::{BatchStatus, ExecutionContext, JobExecution, StepExecution};
use batchwork_resilience::{RetryExecutor, RetryPolicy};
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::codec::{context_changes, context_from_document, from_document, to_document};
use crate::document::collections::{
    EXECUTION_CONTEXTS, JOB_EXECUTIONS, JOB_INSTANCES, STEP_EXECUTIONS,
};
use crate::document::{DocumentStore, Filter};
use crate::entities::{JobExecutionRecord, JobInstanceRecord, StepExecutionRecord};
use crate::error::{StorageError, StorageResult};

const JOB_INSTANCE_SEQUENCE: &str = "job_instance";
const JOB_EXECUTION_SEQUENCE: &str = "job_execution";
const STEP_EXECUTION_SEQUENCE: &str = "step_execution";

const RUNNING_STATUSES: [BatchStatus; 3] = [
    BatchStatus::Starting,
    BatchStatus::Started,
    BatchStatus::Stopping,
];

/// A document store plus the retry policy used to reach it
#[derive(Clone)]
pub struct StoreAccess {
    store: Arc<dyn DocumentStore>,
    retry: RetryExecutor,
}

impl fmt::Debug for StoreAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAccess")
            .field("store", &self.store.name())
            .field("retry", self.retry.policy())
            .finish()
    }
}

impl StoreAccess {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            retry: RetryExecutor::new(policy),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Run one store operation under the retry policy
    pub async fn call<T, F, Fut>(&self, operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        self.retry.execute(operation).await.map_err(StorageError::from)
    }
}

fn sorted_by_id<T>(mut records: Vec<T>, id: impl Fn(&T) -> i64, descending: bool) -> Vec<T> {
    records.sort_by_key(|record| id(record));
    if descending {
        records.reverse();
    }
    records
}

fn decode_all<T: serde::de::DeserializeOwned>(
    documents: Vec<(String, crate::document::Document)>,
) -> StorageResult<Vec<T>> {
    documents
        .into_iter()
        .map(|(_, document)| from_document(document))
        .collect()
}

/// Job instances, unique on (job name, job key)
#[derive(Debug, Clone)]
pub struct JobInstanceDao {
    access: StoreAccess,
}

impl JobInstanceDao {
    pub fn new(access: StoreAccess) -> Self {
        Self { access }
    }

    pub async fn ensure_indexes(&self) -> StorageResult<()> {
        self.access
            .call(|| {
                self.access
                    .store()
                    .create_unique_index(JOB_INSTANCES, &["job_name", "job_key"])
            })
            .await
    }

    pub async fn get(&self, id: i64) -> StorageResult<Option<JobInstanceRecord>> {
        let id = id.to_string();
        let document = self
            .access
            .call(|| self.access.store().find_by_id(JOB_INSTANCES, &id))
            .await?;
        document.map(from_document).transpose()
    }

    pub async fn find(&self, job_name: &str, job_key: &str) -> StorageResult<Option<JobInstanceRecord>> {
        let filter = Filter::new()
            .equals("job_name", job_name)
            .equals("job_key", job_key);
        let documents = self
            .access
            .call(|| self.access.store().find(JOB_INSTANCES, &filter))
            .await?;
        Ok(decode_all(documents)?.into_iter().next())
    }

    /// Create the instance, or return the one a concurrent caller created
    pub async fn create(&self, job_name: &str, job_key: &str) -> StorageResult<JobInstanceRecord> {
        let id = self
            .access
            .call(|| self.access.store().next_id(JOB_INSTANCE_SEQUENCE))
            .await?;
        let record = JobInstanceRecord::new(id, job_name, job_key);
        let document = to_document(&record)?;
        let key = id.to_string();

        match self
            .access
            .call(|| self.access.store().insert(JOB_INSTANCES, &key, document.clone()))
            .await
        {
            Ok(()) => Ok(record),
            Err(StorageError::DuplicateKey(reason)) => {
                self.find(job_name, job_key)
                    .await?
                    .ok_or(StorageError::DuplicateKey(reason))
            }
            Err(other) => Err(other),
        }
    }

    /// Point the instance at a new execution. Fails with `VersionConflict`
    /// when another launch claimed it first.
    pub async fn claim(&self, record: &JobInstanceRecord, execution_id: i64) -> StorageResult<JobInstanceRecord> {
        let mut claimed = record.clone();
        claimed.version += 1;
        claimed.last_execution_id = Some(execution_id);
        claimed.claimed_at = Some(Utc::now());
        let document = to_document(&claimed)?;
        let key = record.id.to_string();

        self.access
            .call(|| {
                self.access
                    .store()
                    .replace(JOB_INSTANCES, &key, record.version, document.clone())
            })
            .await?;
        Ok(claimed)
    }

    /// Undo a claim whose execution was never written, pointing the
    /// instance back at `previous_execution_id`
    pub async fn release(
        &self,
        claimed: &JobInstanceRecord,
        previous_execution_id: Option<i64>,
    ) -> StorageResult<JobInstanceRecord> {
        let mut released = claimed.clone();
        released.version += 1;
        released.last_execution_id = previous_execution_id;
        released.claimed_at = None;
        let document = to_document(&released)?;
        let key = claimed.id.to_string();

        self.access
            .call(|| {
                self.access
                    .store()
                    .replace(JOB_INSTANCES, &key, claimed.version, document.clone())
            })
            .await?;
        Ok(released)
    }

        /// Instances of a job, newest first
    pub async fn find_by_name(&self, job_name: &str) -> StorageResult<Vec<JobInstanceRecord>> {
        let filter = Filter::new().equals("job_name", job_name);
        let documents = self
            .access
            .call(|| self.access.store().find(JOB_INSTANCES, &filter))
            .await?;
        Ok(sorted_by_id(decode_all(documents)?, |r: &JobInstanceRecord| r.id, true))
    }

    pub async fn job_names(&self) -> StorageResult<Vec<String>> {
        let values = self
            .access
            .call(|| self.access.store().distinct(JOB_INSTANCES, "job_name"))
            .await?;
        let mut names: Vec<String> = values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone)]
pub struct JobExecutionDao {
    access: StoreAccess,
}

impl JobExecutionDao {
    pub fn new(access: StoreAccess) -> Self {
        Self { access }
    }

    pub async fn next_id(&self) -> StorageResult<i64> {
        self.access
            .call(|| self.access.store().next_id(JOB_EXECUTION_SEQUENCE))
            .await
    }

    pub async fn insert(&self, record: &JobExecutionRecord) -> StorageResult<()> {
        let document = to_document(record)?;
        let key = record.id.to_string();
        self.access
            .call(|| self.access.store().insert(JOB_EXECUTIONS, &key, document.clone()))
            .await
    }

    /// Store `record` if the stored version is still `expected_version`
    pub async fn replace(&self, record: &JobExecutionRecord, expected_version: i64) -> StorageResult<()> {
        let document = to_document(record)?;
        let key = record.id.to_string();
        self.access
            .call(|| {
                self.access
                    .store()
                    .replace(JOB_EXECUTIONS, &key, expected_version, document.clone())
            })
            .await
    }

    pub async fn get(&self, id: i64) -> StorageResult<Option<JobExecutionRecord>> {
        let key = id.to_string();
        let document = self
            .access
            .call(|| self.access.store().find_by_id(JOB_EXECUTIONS, &key))
            .await?;
        document.map(from_document).transpose()
    }

    /// Executions of an instance, newest first
    pub async fn find_by_instance(&self, instance_id: i64) -> StorageResult<Vec<JobExecutionRecord>> {
        let filter = Filter::new().equals("job_instance_id", instance_id);
        let documents = self
            .access
            .call(|| self.access.store().find(JOB_EXECUTIONS, &filter))
            .await?;
        Ok(sorted_by_id(decode_all(documents)?, |r: &JobExecutionRecord| r.id, true))
    }

    /// Executions of a job that are starting, started or stopping
    pub async fn find_running(&self, job_name: &str) -> StorageResult<Vec<JobExecutionRecord>> {
        let filter = Filter::new()
            .equals("job_name", job_name)
            .any_of("status", RUNNING_STATUSES.iter().map(|s| s.as_str()));
        let documents = self
            .access
            .call(|| self.access.store().find(JOB_EXECUTIONS, &filter))
            .await?;
        Ok(sorted_by_id(decode_all(documents)?, |r: &JobExecutionRecord| r.id, true))
    }
}

#[derive(Debug, Clone)]
pub struct StepExecutionDao {
    access: StoreAccess,
}

impl StepExecutionDao {
    pub fn new(access: StoreAccess) -> Self {
        Self { access }
    }

    pub async fn next_id(&self) -> StorageResult<i64> {
        self.access
            .call(|| self.access.store().next_id(STEP_EXECUTION_SEQUENCE))
            .await
    }

    pub async fn insert(&self, record: &StepExecutionRecord) -> StorageResult<()> {
        let document = to_document(record)?;
        let key = record.id.to_string();
        self.access
            .call(|| self.access.store().insert(STEP_EXECUTIONS, &key, document.clone()))
            .await
    }

    pub async fn replace(&self, record: &StepExecutionRecord, expected_version: i64) -> StorageResult<()> {
        let document = to_document(record)?;
        let key = record.id.to_string();
        self.access
            .call(|| {
                self.access
                    .store()
                    .replace(STEP_EXECUTIONS, &key, expected_version, document.clone())
            })
            .await
    }

    pub async fn get(&self, id: i64) -> StorageResult<Option<StepExecutionRecord>> {
        let key = id.to_string();
        let document = self
            .access
            .call(|| self.access.store().find_by_id(STEP_EXECUTIONS, &key))
            .await?;
        document.map(from_document).transpose()
    }

    /// Steps of one job execution in creation order
    pub async fn find_by_job_execution(&self, job_execution_id: i64) -> StorageResult<Vec<StepExecutionRecord>> {
        let filter = Filter::new().equals("job_execution_id", job_execution_id);
        let documents = self
            .access
            .call(|| self.access.store().find(STEP_EXECUTIONS, &filter))
            .await?;
        Ok(sorted_by_id(decode_all(documents)?, |r: &StepExecutionRecord| r.id, false))
    }

    /// Executions of one step across several job executions, newest first
    pub async fn find_by_step_name(
        &self,
        job_execution_ids: &[i64],
        step_name: &str,
    ) -> StorageResult<Vec<StepExecutionRecord>> {
        let filter = Filter::new()
            .any_of("job_execution_id", job_execution_ids.iter().copied())
            .equals("step_name", step_name);
        let documents = self
            .access
            .call(|| self.access.store().find(STEP_EXECUTIONS, &filter))
            .await?;
        Ok(sorted_by_id(decode_all(documents)?, |r: &StepExecutionRecord| r.id, true))
    }
}

/// Owner of an execution context document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOwner {
    Job(i64),
    Step(i64),
}

impl ContextOwner {
    pub fn document_id(&self) -> String {
        match self {
            ContextOwner::Job(id) => format!("job:{}", id),
            ContextOwner::Step(id) => format!("step:{}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContextDao {
    access: StoreAccess,
}

impl ExecutionContextDao {
    pub fn new(access: StoreAccess) -> Self {
        Self { access }
    }

    /// Stored context, empty if none was ever written
    pub async fn load(&self, owner: ContextOwner) -> StorageResult<ExecutionContext> {
        let key = owner.document_id();
        let document = self
            .access
            .call(|| self.access.store().find_by_id(EXECUTION_CONTEXTS, &key))
            .await?;
        Ok(document.map(context_from_document).unwrap_or_default())
    }

    /// Write the dirty keys of `context`; a clean context costs nothing
    pub async fn save_changes(&self, owner: ContextOwner, context: &ExecutionContext) -> StorageResult<()> {
        if !context.is_dirty() {
            return Ok(());
        }
        let (set, unset) = context_changes(context);
        let key = owner.document_id();
        self.access
            .call(|| {
                self.access
                    .store()
                    .upsert_fields(EXECUTION_CONTEXTS, &key, set.clone(), &unset)
            })
            .await
    }
}

/// All four DAOs over one store, plus loading of fully populated
/// executions
#[derive(Debug, Clone)]
pub struct BatchDaos {
    pub instances: JobInstanceDao,
    pub executions: JobExecutionDao,
    pub steps: StepExecutionDao,
    pub contexts: ExecutionContextDao,
}

impl BatchDaos {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        let access = StoreAccess::new(store, policy);
        Self {
            instances: JobInstanceDao::new(access.clone()),
            executions: JobExecutionDao::new(access.clone()),
            steps: StepExecutionDao::new(access.clone()),
            contexts: ExecutionContextDao::new(access),
        }
    }

    /// Step execution with its context
    pub async fn load_step_execution(&self, record: StepExecutionRecord) -> StorageResult<StepExecution> {
        let mut step = record.into_step_execution();
        step.execution_context = self.contexts.load(ContextOwner::Step(step.id)).await?;
        Ok(step)
    }

    /// Job execution with its instance, context and step executions
    pub async fn load_job_execution(&self, record: JobExecutionRecord) -> StorageResult<JobExecution> {
        let instance = self
            .instances
            .get(record.job_instance_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                collection: JOB_INSTANCES.to_string(),
                id: record.job_instance_id.to_string(),
            })?
            .to_instance();

        let mut execution = record.into_execution(instance);
        execution.execution_context = self.contexts.load(ContextOwner::Job(execution.id)).await?;
        for step in self.steps.find_by_job_execution(execution.id).await? {
            let step = self.load_step_execution(step).await?;
            execution.step_executions.push(step);
        }
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;

    fn access() -> StoreAccess {
        StoreAccess::new(
            Arc::new(InMemoryDocumentStore::new("batch")),
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test]
    async fn test_instance_create_is_idempotent_per_key() {
        let dao = JobInstanceDao::new(access());
        dao.ensure_indexes().await.unwrap();

        let first = dao.create("load-orders", "abc").await.unwrap();
        let second = dao.create("load-orders", "abc").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = dao.create("load-orders", "def").await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(dao.find_by_name("load-orders").await.unwrap().len(), 2);
        assert_eq!(dao.job_names().await.unwrap(), vec!["load-orders".to_string()]);
    }

    #[tokio::test]
    async fn test_claim_conflicts_on_stale_version() {
        let dao = JobInstanceDao::new(access());
        let record = dao.create("load-orders", "abc").await.unwrap();

        let claimed = dao.claim(&record, 10).await.unwrap();
        assert_eq!(claimed.version, 1);
        assert_eq!(claimed.last_execution_id, Some(10));

        let lost = dao.claim(&record, 11).await;
        assert!(matches!(lost, Err(StorageError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn test_release_restores_previous_execution() {
        let dao = JobInstanceDao::new(access());
        let record = dao.create("load-orders", "abc").await.unwrap();
        let first = dao.claim(&record, 10).await.unwrap();
        let second = dao.claim(&first, 11).await.unwrap();

        let released = dao.release(&second, Some(10)).await.unwrap();
        assert_eq!(released.last_execution_id, Some(10));
        assert!(released.claimed_at.is_none());

        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored, released);
        assert!(matches!(
            dao.release(&second, Some(10)).await,
            Err(StorageError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let dao = ExecutionContextDao::new(access());
        let owner = ContextOwner::Step(4);
        assert!(dao.load(owner).await.unwrap().is_empty());

        let mut context = ExecutionContext::new();
        context.put_i64("reader.offset", 40);
        context.put_string("file", "orders.csv");
        dao.save_changes(owner, &context).await.unwrap();
        context.clear_dirty();

        context.remove("file");
        dao.save_changes(owner, &context).await.unwrap();

        let loaded = dao.load(owner).await.unwrap();
        assert_eq!(loaded.get_i64("reader.offset"), Some(40));
        assert!(!loaded.contains_key("file"));
    }
}
