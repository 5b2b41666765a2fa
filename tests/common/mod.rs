//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use batchwork_config::{BatchConfig, LaunchMode};
use batchwork_core::{ChunkContext, Job, RepeatStatus, Step};
use batchwork_operator::BatchContext;
use batchwork_registry::MapJobRegistry;
use batchwork_storage::InMemoryStoreClient;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Order in which steps started, shared by all steps of a test
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, entry: &str) {
        self.entries.lock().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Single-chunk step that records itself, writes `<name>.rows` into the job
/// context and optionally reads another step's key
pub struct RecordingStep {
    name: String,
    journal: Arc<Journal>,
    rows: i64,
    reads: Option<String>,
    observed: Mutex<Option<i64>>,
    fail: AtomicBool,
}

impl RecordingStep {
    pub fn new(name: &str, journal: Arc<Journal>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal,
            rows: 10,
            reads: None,
            observed: Mutex::new(None),
            fail: AtomicBool::new(false),
        })
    }

    pub fn reading(name: &str, journal: Arc<Journal>, key: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal,
            rows: 10,
            reads: Some(key.to_string()),
            observed: Mutex::new(None),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn observed(&self) -> Option<i64> {
        *self.observed.lock()
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &mut ChunkContext<'_>) -> anyhow::Result<RepeatStatus> {
        self.journal.record(&self.name);
        if let Some(key) = &self.reads {
            *self.observed.lock() = context.job_context.get_i64(key);
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("step {} could not process its input", self.name);
        }
        context.step_execution.read_count += self.rows as u64;
        context.step_execution.write_count += self.rows as u64;
        context.job_context.put_i64(format!("{}.rows", self.name), self.rows);
        Ok(RepeatStatus::Finished)
    }
}

pub fn base_config(mode: LaunchMode) -> BatchConfig {
    let mut config = BatchConfig::default();
    config.execution.launch_mode = mode;
    config.storage.retry.initial_delay_ms = 1;
    config.storage.retry.max_delay_ms = 5;
    config.storage.retry.jitter = false;
    config
}

pub async fn batch_context(config: BatchConfig, jobs: Vec<Arc<dyn Job>>) -> BatchContext {
    let _ = batchwork_logging::init_simple_tracing("warn");
    let registry = Arc::new(MapJobRegistry::with_jobs(jobs).expect("unique job names"));
    BatchContext::build(config, &InMemoryStoreClient::new(), registry)
        .await
        .expect("batch context")
}
