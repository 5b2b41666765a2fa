//! In-process document store
//!
//! Every operation takes the state lock once and releases it before
//! returning, which gives the same single-document atomicity a networked
//! document database offers. Nothing is held across an await point.

use async_trait::async_trait;
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::document::{Document, DocumentStore, Filter, StoreClient, VERSION_FIELD};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Document>>,
    unique_indexes: HashMap<String, Vec<Vec<String>>>,
    sequences: HashMap<String, i64>,
}

/// Document store kept entirely in memory
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    name: String,
    state: RwLock<MemoryState>,
}

impl InMemoryDocumentStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

/// Reject field names a document database would refuse
fn validate_field_names(document: &Document) -> StorageResult<()> {
    match document.keys().find(|key| key.contains('.') || key.starts_with('$')) {
        Some(key) => Err(StorageError::InvalidDocument(format!(
            "field name '{}' may not contain '.' or start with '$'",
            key
        ))),
        None => Ok(()),
    }
}

fn stored_version(document: &Document) -> i64 {
    document.get(VERSION_FIELD).and_then(Value::as_i64).unwrap_or(0)
}

fn index_key(document: &Document, fields: &[String]) -> Option<Vec<Value>> {
    fields.iter().map(|field| document.get(field).cloned()).collect()
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_id(&self, sequence: &str) -> StorageResult<i64> {
        let mut state = self.state.write();
        let counter = state.sequences.entry(sequence.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn create_unique_index(&self, collection: &str, fields: &[&str]) -> StorageResult<()> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut state = self.state.write();
        let indexes = state.unique_indexes.entry(collection.to_string()).or_default();
        if !indexes.contains(&fields) {
            debug!("Creating unique index on {}({})", collection, fields.join(", "));
            indexes.push(fields);
        }
        Ok(())
    }

    async fn insert(&self, collection: &str, id: &str, document: Document) -> StorageResult<()> {
        validate_field_names(&document)?;
        let mut state = self.state.write();
        let MemoryState {
            collections,
            unique_indexes,
            ..
        } = &mut *state;
        let documents = collections.entry(collection.to_string()).or_default();

        if documents.contains_key(id) {
            return Err(StorageError::DuplicateKey(format!("{}/{}", collection, id)));
        }

        for fields in unique_indexes.get(collection).into_iter().flatten() {
            let Some(key) = index_key(&document, fields) else {
                continue;
            };
            let taken = documents
                .values()
                .any(|existing| index_key(existing, fields).as_ref() == Some(&key));
            if taken {
                return Err(StorageError::DuplicateKey(format!(
                    "{} unique index ({}) already holds {:?}",
                    collection,
                    fields.join(", "),
                    key
                )));
            }
        }

        documents.insert(id.to_string(), document);
        Ok(())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<(String, Document)>> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, document)| filter.matches(document))
                    .map(|(id, document)| (id.clone(), document.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StorageResult<()> {
        validate_field_names(&document)?;
        let mut state = self.state.write();
        let stored = state
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StorageError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let found = stored_version(stored);
        if found != expected_version {
            return Err(StorageError::VersionConflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_version,
                found,
            });
        }

        *stored = document;
        Ok(())
    }

    async fn upsert_fields(
        &self,
        collection: &str,
        id: &str,
        set: Document,
        unset: &[String],
    ) -> StorageResult<()> {
        validate_field_names(&set)?;
        let mut state = self.state.write();
        let document = state
            .collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();

        for field in unset {
            document.remove(field);
        }
        document.extend(set);
        Ok(())
    }

    async fn distinct(&self, collection: &str, field: &str) -> StorageResult<Vec<Value>> {
        let state = self.state.read();
        let mut values: Vec<Value> = Vec::new();
        for document in state.collections.get(collection).into_iter().flat_map(BTreeMap::values) {
            if let Some(value) = document.get(field) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Client handing out one in-memory store per database name
#[derive(Debug, Default)]
pub struct InMemoryStoreClient {
    databases: Mutex<HashMap<String, Arc<InMemoryDocumentStore>>>,
}

impl InMemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete store behind a database name, created on first use
    pub fn memory_database(&self, name: &str) -> Arc<InMemoryDocumentStore> {
        self.databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryDocumentStore::new(name)))
            .clone()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl StoreClient for InMemoryStoreClient {
    fn database(&self, name: &str) -> StorageResult<Arc<dyn DocumentStore>> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidDocument(
                "database name cannot be empty".to_string(),
            ));
        }
        Ok(self.memory_database(name))
    }
}
