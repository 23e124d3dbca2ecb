//! Secondary index: equality lookups on a document field.

use crate::document::{canonical_key, field_value};
use crate::error::{CoreError, CoreResult};
use crate::index::primary::PrimaryIndex;
use crate::types::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Posting map for one (collection, field) pair.
///
/// Keys are the canonical JSON encoding of the field value, so two
/// documents land in the same posting list exactly when their field values
/// are JSON-structurally equal. A document with the field missing produces
/// no posting; an explicit `null` posts under the `null` key.
///
/// Ordered containers keep lookups and persistence deterministic, which
/// also gives the stable-within-a-process result ordering the query layer
/// relies on.
#[derive(Debug)]
pub struct SecondaryIndex {
    collection: String,
    field: String,
    postings: BTreeMap<String, BTreeSet<DocumentId>>,
}

/// Persisted form of a secondary index:
/// `{ "collection": ..., "field": ..., "index": { value → [ids] } }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SecondaryIndexFile {
    /// Collection the index belongs to.
    pub collection: String,
    /// Indexed field path.
    pub field: String,
    /// Posting lists keyed by canonical value.
    pub index: BTreeMap<String, Vec<DocumentId>>,
}

impl SecondaryIndex {
    /// Creates an empty secondary index.
    #[must_use]
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            postings: BTreeMap::new(),
        }
    }

    /// Builds an index over (id, document) pairs.
    pub fn from_entries<'a, I>(
        collection: impl Into<String>,
        field: impl Into<String>,
        entries: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a DocumentId, &'a Document)>,
    {
        let mut index = Self::new(collection, field);
        for (id, doc) in entries {
            index.insert(id, doc);
        }
        index
    }

    /// Returns the indexed field path.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the owning collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Adds a document's posting, if it has the indexed field.
    pub fn insert(&mut self, id: &DocumentId, doc: &Document) {
        if let Some(value) = field_value(doc, &self.field) {
            self.postings
                .entry(canonical_key(value))
                .or_default()
                .insert(id.clone());
        }
    }

    /// Removes a document's posting derived from its previous image.
    pub fn remove(&mut self, id: &DocumentId, old_doc: &Document) {
        if let Some(value) = field_value(old_doc, &self.field) {
            let key = canonical_key(value);
            if let Some(ids) = self.postings.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&key);
                }
            }
        }
    }

    /// Returns the ids whose documents carry `value` in the indexed field.
    #[must_use]
    pub fn lookup(&self, value: &serde_json::Value) -> Vec<DocumentId> {
        self.postings
            .get(&canonical_key(value))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the total number of postings across all values.
    #[must_use]
    pub fn posting_count(&self) -> usize {
        self.postings.values().map(BTreeSet::len).sum()
    }

    /// Iterates over (canonical value, posting set) entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<DocumentId>)> {
        self.postings.iter()
    }

    /// Converts to the persisted file form.
    #[must_use]
    pub fn to_file(&self) -> SecondaryIndexFile {
        SecondaryIndexFile {
            collection: self.collection.clone(),
            field: self.field.clone(),
            index: self
                .postings
                .iter()
                .map(|(value, ids)| (value.clone(), ids.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Reconstructs an index from its persisted form.
    #[must_use]
    pub fn from_file(file: SecondaryIndexFile) -> Self {
        Self {
            collection: file.collection,
            field: file.field,
            postings: file
                .index
                .into_iter()
                .map(|(value, ids)| (value, ids.into_iter().collect()))
                .collect(),
        }
    }

    /// Checks that every posted id exists in the primary index.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` naming the first dangling id; the caller
    /// discards the index and rebuilds from storage.
    pub fn validate_against(&self, primary: &PrimaryIndex, path: &Path) -> CoreResult<()> {
        for (value, ids) in &self.postings {
            for id in ids {
                if !primary.contains(id.as_str()) {
                    return Err(CoreError::corrupt(
                        path,
                        format!("posting {value} references unknown document {id}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let mut index = SecondaryIndex::new("users", "city");
        index.insert(&id("u1"), &doc(json!({"city": "Mumbai"})));
        index.insert(&id("u2"), &doc(json!({"city": "Delhi"})));
        index.insert(&id("u3"), &doc(json!({"city": "Mumbai"})));

        let mumbai = index.lookup(&json!("Mumbai"));
        assert_eq!(mumbai, vec![id("u1"), id("u3")]);
        assert_eq!(index.lookup(&json!("Delhi")), vec![id("u2")]);
        assert!(index.lookup(&json!("Pune")).is_empty());
    }

    #[test]
    fn missing_field_produces_no_posting() {
        let mut index = SecondaryIndex::new("users", "city");
        index.insert(&id("u1"), &doc(json!({"name": "Alice"})));
        assert_eq!(index.posting_count(), 0);
    }

    #[test]
    fn explicit_null_is_posted() {
        let mut index = SecondaryIndex::new("users", "city");
        index.insert(&id("u1"), &doc(json!({"city": null})));
        assert_eq!(index.lookup(&json!(null)), vec![id("u1")]);
    }

    #[test]
    fn nested_field_path() {
        let mut index = SecondaryIndex::new("users", "address.city");
        index.insert(&id("u1"), &doc(json!({"address": {"city": "Mumbai"}})));
        assert_eq!(index.lookup(&json!("Mumbai")), vec![id("u1")]);
    }

    #[test]
    fn remove_clears_posting() {
        let mut index = SecondaryIndex::new("users", "city");
        let mumbai = doc(json!({"city": "Mumbai"}));
        index.insert(&id("u1"), &mumbai);
        index.insert(&id("u2"), &mumbai);

        index.remove(&id("u1"), &mumbai);
        assert_eq!(index.lookup(&json!("Mumbai")), vec![id("u2")]);

        index.remove(&id("u2"), &mumbai);
        assert!(index.lookup(&json!("Mumbai")).is_empty());
        assert_eq!(index.posting_count(), 0);
    }

    #[test]
    fn values_compared_structurally() {
        let mut index = SecondaryIndex::new("users", "age");
        index.insert(&id("u1"), &doc(json!({"age": 1})));
        index.insert(&id("u2"), &doc(json!({"age": "1"})));

        assert_eq!(index.lookup(&json!(1)), vec![id("u1")]);
        assert_eq!(index.lookup(&json!("1")), vec![id("u2")]);
    }

    #[test]
    fn file_round_trip_preserves_lookups() {
        let mut index = SecondaryIndex::new("users", "city");
        index.insert(&id("u1"), &doc(json!({"city": "Mumbai"})));
        index.insert(&id("u2"), &doc(json!({"city": "Delhi"})));

        let bytes = serde_json::to_vec(&index.to_file()).unwrap();
        let file: SecondaryIndexFile = serde_json::from_slice(&bytes).unwrap();
        let restored = SecondaryIndex::from_file(file);

        assert_eq!(restored.lookup(&json!("Mumbai")), index.lookup(&json!("Mumbai")));
        assert_eq!(restored.lookup(&json!("Delhi")), index.lookup(&json!("Delhi")));
        assert_eq!(restored.field(), "city");
        assert_eq!(restored.collection(), "users");
    }

    #[test]
    fn validate_detects_dangling_id() {
        let mut primary = PrimaryIndex::new();
        primary.insert(id("u1"), doc(json!({"city": "Mumbai"})));

        let mut index = SecondaryIndex::new("users", "city");
        index.insert(&id("u1"), &doc(json!({"city": "Mumbai"})));
        index.insert(&id("ghost"), &doc(json!({"city": "Delhi"})));

        let path = PathBuf::from("users_idx_city.json");
        assert!(index.validate_against(&primary, &path).is_err());

        index.remove(&id("ghost"), &doc(json!({"city": "Delhi"})));
        assert!(index.validate_against(&primary, &path).is_ok());
    }
}
