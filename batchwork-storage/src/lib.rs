//! Persistence for batchwork
//!
//! Job instances, job executions, step executions and execution contexts are
//! stored as documents in a [`DocumentStore`]. Writes to execution records
//! are version checked, so two processes acting on the same execution cannot
//! silently overwrite each other. The [`JobRepository`] is the write side
//! used by launchers and the engine; [`JobExplorer`] is read-only.

pub mod codec;
pub mod dao;
pub mod document;
pub mod entities;
pub mod error;
pub mod explorer;
pub mod memory;
pub mod repository;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core types for convenience
pub use dao::{BatchDaos, ContextOwner, StoreAccess};
pub use document::{collections, Document, DocumentStore, Filter, StoreClient};
pub use entities::{JobExecutionRecord, JobInstanceRecord, ParameterRecord, StepExecutionRecord};
pub use error::{StorageError, StorageResult};
pub use explorer::{JobExplorer, SimpleJobExplorer};
pub use memory::{InMemoryDocumentStore, InMemoryStoreClient};
pub use repository::{JobRepository, SimpleJobRepository};
