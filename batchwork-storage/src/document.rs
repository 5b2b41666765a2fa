//! Document store collaborator
//!
//! The repository talks to its backing store only through [`DocumentStore`]:
//! string-keyed documents grouped in collections, single-document atomic
//! writes, and a version-checked replace used for optimistic locking. Any
//! backend that can offer those guarantees can sit behind it.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::StorageResult;

/// A stored document: a JSON object without its id
pub type Document = Map<String, Value>;

/// Field holding the optimistic-locking counter
pub const VERSION_FIELD: &str = "version";

/// Logical collections used by the batch repository
pub mod collections {
    pub const JOB_INSTANCES: &str = "job_instances";
    pub const JOB_EXECUTIONS: &str = "job_executions";
    pub const STEP_EXECUTIONS: &str = "step_executions";
    pub const EXECUTION_CONTEXTS: &str = "execution_contexts";
}

/// Filter operators
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperator {
    Equals,
    In,
}

/// A single filter condition on a top-level field
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

/// Conjunction of conditions; an empty filter matches every document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator: FilterOperator::Equals,
            value: value.into(),
        });
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator: FilterOperator::In,
            value: Value::Array(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether the document satisfies every condition
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|condition| {
            let field = document.get(&condition.field).unwrap_or(&Value::Null);
            match (&condition.operator, &condition.value) {
                (FilterOperator::Equals, expected) => field == expected,
                (FilterOperator::In, Value::Array(options)) => options.contains(field),
                (FilterOperator::In, _) => false,
            }
        })
    }
}

/// Storage operations the batch repository needs
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this store serves
    fn name(&self) -> &str;

    /// Next value of a monotonically increasing sequence, starting at 1
    async fn next_id(&self, sequence: &str) -> StorageResult<i64>;

    /// Declare that `fields` together must be unique within `collection`
    async fn create_unique_index(&self, collection: &str, fields: &[&str]) -> StorageResult<()>;

    /// Insert a new document; fails with `DuplicateKey` if the id or a
    /// unique index value is taken
    async fn insert(&self, collection: &str, id: &str, document: Document) -> StorageResult<()>;

    async fn find_by_id(&self, collection: &str, id: &str) -> StorageResult<Option<Document>>;

    /// All documents matching the filter, ordered by id
    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<(String, Document)>>;

    /// Replace a document whose stored `version` equals `expected_version`.
    /// Fails with `VersionConflict` otherwise and `NotFound` if absent.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StorageResult<()>;

    /// Set and remove top-level fields, creating the document if needed
    async fn upsert_fields(
        &self,
        collection: &str,
        id: &str,
        set: Document,
        unset: &[String],
    ) -> StorageResult<()>;

    /// Distinct values of a top-level field across a collection
    async fn distinct(&self, collection: &str, field: &str) -> StorageResult<Vec<Value>>;

    async fn health_check(&self) -> StorageResult<()>;
}

/// Hands out document stores by database name.
///
/// Application data and batch metadata may live in different databases of
/// the same deployment; callers resolve both through one client.
pub trait StoreClient: Send + Sync {
    fn database(&self, name: &str) -> StorageResult<Arc<dyn DocumentStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&document(json!({"a": 1}))));
    }

    #[test]
    fn test_filter_conditions() {
        let filter = Filter::new()
            .equals("job_name", "load-orders")
            .any_of("status", ["STARTING", "STARTED"]);

        assert!(filter.matches(&document(json!({"job_name": "load-orders", "status": "STARTED"}))));
        assert!(!filter.matches(&document(json!({"job_name": "load-orders", "status": "FAILED"}))));
        assert!(!filter.matches(&document(json!({"job_name": "other", "status": "STARTED"}))));
        assert!(!filter.matches(&document(json!({"status": "STARTED"}))));
    }
}
