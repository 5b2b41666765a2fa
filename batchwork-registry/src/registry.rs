use batchwork_core::{BatchError, Job, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Lookup of job definitions by name
pub trait JobRegistry: Send + Sync {
    /// Register a job under its own name; fails with `DuplicateJob` if the
    /// name is taken
    fn register(&self, job: Arc<dyn Job>) -> Result<()>;

    /// Remove a job; does nothing if it was never registered
    fn unregister(&self, job_name: &str);

    /// Fails with `NoSuchJob` if absent
    fn get_job(&self, job_name: &str) -> Result<Arc<dyn Job>>;

    /// Registered names in sorted order
    fn job_names(&self) -> Vec<String>;

    fn contains(&self, job_name: &str) -> bool {
        self.get_job(job_name).is_ok()
    }
}

/// Registry backed by a map behind a read-write lock
#[derive(Default)]
pub struct MapJobRegistry {
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
}

impl MapJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a set of jobs, failing on the first duplicate
    pub fn with_jobs(jobs: impl IntoIterator<Item = Arc<dyn Job>>) -> Result<Self> {
        let registry = Self::new();
        for job in jobs {
            registry.register(job)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl fmt::Debug for MapJobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapJobRegistry")
            .field("jobs", &self.job_names())
            .finish()
    }
}

impl JobRegistry for MapJobRegistry {
    fn register(&self, job: Arc<dyn Job>) -> Result<()> {
        let name = job.name().to_string();
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&name) {
            return Err(BatchError::DuplicateJob(name));
        }
        info!(job_name = %name, steps = job.steps().len(), "Registered job");
        jobs.insert(name, job);
        Ok(())
    }

    fn unregister(&self, job_name: &str) {
        if self.jobs.write().remove(job_name).is_some() {
            info!(job_name, "Unregistered job");
        } else {
            debug!(job_name, "Unregister requested for unknown job");
        }
    }

    fn get_job(&self, job_name: &str) -> Result<Arc<dyn Job>> {
        self.jobs
            .read()
            .get(job_name)
            .cloned()
            .ok_or_else(|| BatchError::NoSuchJob(job_name.to_string()))
    }

    fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn contains(&self, job_name: &str) -> bool {
        self.jobs.read().contains_key(job_name)
    }
}
