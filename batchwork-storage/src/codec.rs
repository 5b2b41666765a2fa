//! Conversion between documents and typed records
//!
//! Execution-context keys may contain dots (`run.id`, `reader.position`)
//! or start with `$`, both of which document stores reject in field names.
//! Stored keys replace every `.` with `{dot}`, a leading `$` with
//! `{dollar}` and every `{` with `{lb}`, so any key read back is exactly
//! the key that was written.

use batchwork_core::ExecutionContext;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::document::Document;
use crate::error::{StorageError, StorageResult};

/// Stand-in for `.` inside stored field names
pub const DOT_ESCAPE: &str = "{dot}";
/// Stand-in for a leading `$`
pub const DOLLAR_ESCAPE: &str = "{dollar}";
/// Stand-in for a literal `{`
pub const BRACE_ESCAPE: &str = "{lb}";

pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for (index, ch) in key.chars().enumerate() {
        match ch {
            '{' => escaped.push_str(BRACE_ESCAPE),
            '.' => escaped.push_str(DOT_ESCAPE),
            '$' if index == 0 => escaped.push_str(DOLLAR_ESCAPE),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn unescape_key(key: &str) -> String {
    let mut unescaped = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(open) = rest.find('{') {
        unescaped.push_str(&rest[..open]);
        let tail = &rest[open..];
        let (replacement, consumed) = [(BRACE_ESCAPE, '{'), (DOT_ESCAPE, '.'), (DOLLAR_ESCAPE, '$')]
            .into_iter()
            .find(|(escape, _)| tail.starts_with(escape))
            .map(|(escape, ch)| (ch, escape.len()))
            .unwrap_or(('{', 1));
        unescaped.push(replacement);
        rest = &tail[consumed..];
    }
    unescaped.push_str(rest);
    unescaped
}

/// Serialize a record into a document
pub fn to_document<T: Serialize>(record: &T) -> StorageResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        other => Err(StorageError::SerializationError(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Deserialize a record from a document
pub fn from_document<T: DeserializeOwned>(document: Document) -> StorageResult<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Fields to set and remove for the dirty part of a context
pub fn context_changes(context: &ExecutionContext) -> (Document, Vec<String>) {
    let (updated, removed) = context.dirty_changes();
    let set = updated
        .into_iter()
        .map(|(key, value)| (escape_key(&key), value))
        .collect();
    let unset = removed.iter().map(|key| escape_key(key)).collect();
    (set, unset)
}

/// Rebuild a clean context from its stored document
pub fn context_from_document(document: Document) -> ExecutionContext {
    let entries: BTreeMap<String, Value> = document
        .into_iter()
        .map(|(key, value)| (unescape_key(&key), value))
        .collect();
    ExecutionContext::from_entries(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_escape_round_trip() {
        assert_eq!(escape_key("reader.position.line"), "reader{dot}position{dot}line");
        assert_eq!(unescape_key("reader{dot}position{dot}line"), "reader.position.line");
        assert_eq!(escape_key("plain"), "plain");
    }

    #[test]
    fn test_escape_dollar_and_braces() {
        assert_eq!(escape_key("$cursor"), "{dollar}cursor");
        assert_eq!(escape_key("price$"), "price$");
        assert_eq!(escape_key("a{dot}b"), "a{lb}dot}b");

        for key in ["$cursor", "a{dot}b", "{dollar}x", "$a.{lb}", "{", "x{"] {
            assert_eq!(unescape_key(&escape_key(key)), key);
        }
    }

    #[test]
    fn test_escaped_keys_are_valid_field_names() {
        let mut context = ExecutionContext::new();
        context.put_string("$cursor", "abc");
        context.put_string("reader{dot}name", "literal");
        context.put_i64("reader.count", 4);

        let (set, _) = context_changes(&context);
        assert!(set
            .keys()
            .all(|key| !key.contains('.') && !key.starts_with('$')));

        let restored = context_from_document(set);
        assert_eq!(restored.get_string("$cursor"), Some("abc"));
        assert_eq!(restored.get_string("reader{dot}name"), Some("literal"));
        assert_eq!(restored.get_i64("reader.count"), Some(4));
        assert!(restored.get_string("reader.name").is_none());
    }

    #[test]
    fn test_context_changes_are_escaped() {
        let mut context = ExecutionContext::from_entries(
            [("old.key".to_string(), json!(1))].into_iter().collect(),
        );
        context.put_i64("reader.count", 10);
        context.remove("old.key");

        let (set, unset) = context_changes(&context);
        assert_eq!(set.get("reader{dot}count"), Some(&json!(10)));
        assert_eq!(unset, vec!["old{dot}key".to_string()]);
    }

    #[test]
    fn test_context_from_document() {
        let document = json!({"reader{dot}count": 10, "name": "x"})
            .as_object()
            .cloned()
            .unwrap();
        let context = context_from_document(document);
        assert_eq!(context.get_i64("reader.count"), Some(10));
        assert_eq!(context.get_string("name"), Some("x"));
        assert!(!context.is_dirty());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: i64,
        name: String,
    }

    #[test]
    fn test_record_documents() {
        let sample = Sample {
            id: 3,
            name: "load".to_string(),
        };
        let document = to_document(&sample).unwrap();
        assert_eq!(document.get("id"), Some(&json!(3)));
        assert_eq!(from_document::<Sample>(document).unwrap(), sample);

        assert!(to_document(&42).is_err());
    }
}
