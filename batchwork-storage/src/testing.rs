//! Testing utilities for batchwork-storage
//!
//! - `FaultInjectingStore` wraps any store and fails chosen operations with
//!   `ConnectionFailed`, to exercise retry and storage-outage handling
//! - `JobExecutionBuilder` creates executions in a given state without going
//!   through a launcher
//!
//! Enable with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! batchwork-storage = { path = "../batchwork-storage", features = ["testing"] }
//! ```

use async_trait::async_trait;
use batchwork_core::{BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameters};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::document::{Document, DocumentStore, Filter};
use crate::error::{StorageError, StorageResult};

/// Store wrapper that injects connection failures
pub struct FaultInjectingStore {
    inner: Arc<dyn DocumentStore>,
    fail_next_any: AtomicU32,
    fail_next_writes: AtomicU32,
    fail_inserts: Mutex<HashMap<String, u32>>,
    unavailable: AtomicBool,
    operations: AtomicU64,
    injected: AtomicU64,
}

impl FaultInjectingStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            fail_next_any: AtomicU32::new(0),
            fail_next_writes: AtomicU32::new(0),
            fail_inserts: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            operations: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// Fail the next `count` operations of any kind
    pub fn fail_next(&self, count: u32) {
        self.fail_next_any.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` inserts, replaces or upserts
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` inserts into `collection` only
    pub fn fail_next_inserts_into(&self, collection: &str, count: u32) {
        self.fail_inserts.lock().insert(collection.to_string(), count);
    }

    /// Fail every operation until switched off again
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_insert(&self, collection: &str) -> bool {
        let mut fail_inserts = self.fail_inserts.lock();
        match fail_inserts.get_mut(collection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn check(&self, operation: &str, write: bool) -> StorageResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let fail = self.unavailable.load(Ordering::SeqCst)
            || Self::take(&self.fail_next_any)
            || (write && Self::take(&self.fail_next_writes));
        if fail {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::ConnectionFailed(format!(
                "injected failure during {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultInjectingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn next_id(&self, sequence: &str) -> StorageResult<i64> {
        self.check("next_id", false)?;
        self.inner.next_id(sequence).await
    }

    async fn create_unique_index(&self, collection: &str, fields: &[&str]) -> StorageResult<()> {
        self.check("create_unique_index", false)?;
        self.inner.create_unique_index(collection, fields).await
    }

    async fn insert(&self, collection: &str, id: &str, document: Document) -> StorageResult<()> {
        self.check("insert", true)?;
        if self.take_insert(collection) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::ConnectionFailed(format!(
                "injected failure during insert into {}",
                collection
            )));
        }
        self.inner.insert(collection, id, document).await
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        self.check("find_by_id", false)?;
        self.inner.find_by_id(collection, id).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<(String, Document)>> {
        self.check("find", false)?;
        self.inner.find(collection, filter).await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StorageResult<()> {
        self.check("replace", true)?;
        self.inner.replace(collection, id, expected_version, document).await
    }

    async fn upsert_fields(
        &self,
        collection: &str,
        id: &str,
        set: Document,
        unset: &[String],
    ) -> StorageResult<()> {
        self.check("upsert_fields", true)?;
        self.inner.upsert_fields(collection, id, set, unset).await
    }

    async fn distinct(&self, collection: &str, field: &str) -> StorageResult<Vec<Value>> {
        self.check("distinct", false)?;
        self.inner.distinct(collection, field).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check("health_check", false)?;
        self.inner.health_check().await
    }
}

/// Builder for job executions in arbitrary states
pub struct JobExecutionBuilder {
    execution: JobExecution,
}

impl JobExecutionBuilder {
    pub fn new(job_name: &str) -> Self {
        let parameters = JobParameters::new();
        let instance = JobInstance::new(1, job_name, parameters.identifying_signature());
        Self {
            execution: JobExecution::new(1, instance, parameters),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.execution.id = id;
        self
    }

    pub fn with_instance_id(mut self, id: i64) -> Self {
        self.execution.job_instance.id = id;
        self
    }

    pub fn with_parameters(mut self, parameters: JobParameters) -> Self {
        self.execution.job_instance.job_key = parameters.identifying_signature();
        self.execution.job_parameters = parameters;
        self
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.execution.status = status;
        self.execution.exit_status = ExitStatus::for_status(status);
        self
    }

    pub fn build(self) -> JobExecution {
        self.execution
    }
}
