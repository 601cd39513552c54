use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::quality::compare_key_sets;

/// Key-level deviations between the merged output and the source document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Keys returned by more than one chunk; the later chunk won.
    pub collisions: Vec<String>,
    /// Source keys no chunk returned.
    pub missing: Vec<String>,
    /// Returned keys that are not in the source.
    pub unexpected: Vec<String>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.collisions.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergedDocument {
    pub document: Map<String, Value>,
    pub integrity: IntegrityReport,
}

/// Fold translated chunks in chunk order. A key seen twice keeps the later value.
pub fn fold_chunks(
    chunks: impl IntoIterator<Item = Map<String, Value>>,
) -> (Map<String, Value>, Vec<String>) {
    let mut merged: Map<String, Value> = Map::new();
    let mut collisions: Vec<String> = Vec::new();
    for (chunk_no, chunk) in chunks.into_iter().enumerate() {
        for (key, value) in chunk {
            if merged.insert(key.clone(), value).is_some() {
                warn!(key = %key, chunk = chunk_no + 1, "key returned by more than one chunk; keeping the later value");
                collisions.push(key);
            }
        }
    }
    (merged, collisions)
}

/// Merge translated chunks into one document laid out in the source's key order.
///
/// Keys the provider invented are appended after the source keys and reported; source keys that
/// never came back are reported and left out. Nothing is repaired silently.
pub fn merge(
    source: &Map<String, Value>,
    chunks: impl IntoIterator<Item = Map<String, Value>>,
) -> MergedDocument {
    let (merged, collisions) = fold_chunks(chunks);
    let diff = compare_key_sets(source, &merged);
    for key in &diff.missing {
        warn!(key = %key, "source key missing from translated output");
    }
    for key in &diff.unexpected {
        warn!(key = %key, "translated output contains a key not in the source");
    }

    let mut known: HashMap<String, Value> = HashMap::with_capacity(merged.len());
    let mut extra: Vec<(String, Value)> = Vec::new();
    for (key, value) in merged {
        if source.contains_key(&key) {
            known.insert(key, value);
        } else {
            extra.push((key, value));
        }
    }
    let mut document: Map<String, Value> = Map::with_capacity(known.len() + extra.len());
    for key in source.keys() {
        if let Some(v) = known.remove(key) {
            document.insert(key.clone(), v);
        }
    }
    document.extend(extra);

    MergedDocument {
        document,
        integrity: IntegrityReport {
            collisions,
            missing: diff.missing,
            unexpected: diff.unexpected,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn merges_in_source_order() {
        let source = obj(json!({"greeting": "Hello", "farewell": "Bye", "count": 2}));
        let merged = merge(
            &source,
            vec![
                obj(json!({"greeting": "Hola"})),
                obj(json!({"count": 2, "farewell": "Adiós"})),
            ],
        );
        assert!(merged.integrity.is_clean());
        let keys: Vec<&str> = merged.document.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["greeting", "farewell", "count"]);
        assert_eq!(
            Value::Object(merged.document),
            json!({"greeting": "Hola", "farewell": "Adiós", "count": 2})
        );
    }

    #[test]
    fn later_chunk_wins_on_collision() {
        let source = obj(json!({"a": "A", "b": "B"}));
        let merged = merge(
            &source,
            vec![obj(json!({"a": "first", "b": "bee"})), obj(json!({"b": "second"}))],
        );
        assert_eq!(merged.document["b"], json!("second"));
        assert_eq!(merged.integrity.collisions, vec!["b".to_string()]);
    }

    #[test]
    fn reports_missing_and_unexpected_keys() {
        let source = obj(json!({"a": "A", "b": "B"}));
        let merged = merge(&source, vec![obj(json!({"a": "x", "zz": "y"}))]);
        assert_eq!(merged.integrity.missing, vec!["b".to_string()]);
        assert_eq!(merged.integrity.unexpected, vec!["zz".to_string()]);
        let keys: Vec<&str> = merged.document.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "zz"]);
    }

    #[test]
    fn empty_input_merges_to_empty_document() {
        let merged = merge(&Map::new(), Vec::new());
        assert!(merged.document.is_empty());
        assert!(merged.integrity.is_clean());
    }
}
