//! Execution context: per-execution scratch state persisted for restart

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;

/// Key/value state scoped to one job or step execution.
///
/// Every mutation records the key as dirty so a checkpoint only has to
/// persist what changed since the previous one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty_keys: BTreeSet<String>,
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clean (non-dirty) context from already persisted entries
    pub fn from_entries(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries,
            dirty_keys: BTreeSet::new(),
        }
    }

    /// Store a serializable value under `key`
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.put_value(key, value);
        Ok(())
    }

    /// Store a raw JSON value; unchanged values do not mark the key dirty
    pub fn put_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.entries.get(&key) == Some(&value) {
            return;
        }
        self.entries.insert(key.clone(), value);
        self.dirty_keys.insert(key);
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put_value(key, Value::String(value.into()));
    }

    pub fn put_i64(&mut self, key: impl Into<String>, value: i64) {
        self.put_value(key, Value::from(value));
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Deserialize the value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty_keys.insert(key.to_string());
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_keys.is_empty()
    }

    /// Mark every entry dirty, forcing a full write on the next checkpoint
    pub fn mark_all_dirty(&mut self) {
        self.dirty_keys = self.entries.keys().cloned().collect();
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_keys.clear();
    }

    /// Changes since the last checkpoint: updated entries and removed keys
    pub fn dirty_changes(&self) -> (BTreeMap<String, Value>, Vec<String>) {
        let mut updated = BTreeMap::new();
        let mut removed = Vec::new();
        for key in &self.dirty_keys {
            match self.entries.get(key) {
                Some(value) => {
                    updated.insert(key.clone(), value.clone());
                }
                None => removed.push(key.clone()),
            }
        }
        (updated, removed)
    }
}
