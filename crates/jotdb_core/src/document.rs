//! Document field access for the index layer.
//!
//! Storage and the WAL treat documents as opaque. This module is the one
//! place that inspects fields by name, with dot-path nesting allowed
//! (`address.city` traverses nested objects).

use crate::types::Document;
use serde_json::Value;

/// Resolves a dot-separated field path against a document.
///
/// Returns `None` if any path segment is missing or if an intermediate
/// value is not an object. A missing field is distinct from an explicit
/// `null` value: the former produces no index posting, the latter posts
/// under the JSON `null` key.
#[must_use]
pub fn field_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

/// Canonical string form of a JSON value, used as a posting-map key.
///
/// Uses the compact JSON encoding so that structurally distinct values map
/// to distinct keys (the string `"1"` encodes as `"\"1\""`, the number `1`
/// as `"1"`). Two values compare equal under JSON-structural equality iff
/// their canonical keys are equal.
#[must_use]
pub fn canonical_key(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn top_level_field() {
        let d = doc(json!({"name": "Alice", "age": 30}));
        assert_eq!(field_value(&d, "name"), Some(&json!("Alice")));
        assert_eq!(field_value(&d, "age"), Some(&json!(30)));
    }

    #[test]
    fn nested_field() {
        let d = doc(json!({"address": {"city": "Mumbai", "geo": {"lat": 19.07}}}));
        assert_eq!(field_value(&d, "address.city"), Some(&json!("Mumbai")));
        assert_eq!(field_value(&d, "address.geo.lat"), Some(&json!(19.07)));
    }

    #[test]
    fn missing_field_is_none() {
        let d = doc(json!({"name": "Alice"}));
        assert!(field_value(&d, "age").is_none());
        assert!(field_value(&d, "address.city").is_none());
    }

    #[test]
    fn non_object_intermediate_is_none() {
        let d = doc(json!({"name": "Alice"}));
        assert!(field_value(&d, "name.first").is_none());
    }

    #[test]
    fn explicit_null_is_present() {
        let d = doc(json!({"nickname": null}));
        assert_eq!(field_value(&d, "nickname"), Some(&Value::Null));
    }

    #[test]
    fn canonical_key_distinguishes_types() {
        assert_ne!(canonical_key(&json!("1")), canonical_key(&json!(1)));
        assert_eq!(canonical_key(&json!("Mumbai")), "\"Mumbai\"");
        assert_eq!(canonical_key(&json!(true)), "true");
        assert_eq!(canonical_key(&json!(null)), "null");
    }

    #[test]
    fn canonical_key_structural_equality() {
        let a = json!({"b": 1, "a": [1, 2]});
        let b = json!({"b": 1, "a": [1, 2]});
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }
}
