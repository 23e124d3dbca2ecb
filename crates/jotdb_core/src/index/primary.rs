//! Primary index: the authoritative in-memory id-to-document map.

use crate::types::{Document, DocumentId};
use std::collections::HashMap;

/// Mapping from document ID to document for one collection.
///
/// Holds exactly one entry per live document and is mutated synchronously
/// with storage writes within a commit. While the database is running this
/// map is the authoritative view of the collection.
#[derive(Debug, Default)]
pub struct PrimaryIndex {
    entries: HashMap<DocumentId, Document>,
}

impl PrimaryIndex {
    /// Creates an empty primary index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a primary index from (id, document) pairs.
    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (DocumentId, Document)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Inserts or replaces a document.
    pub fn insert(&mut self, id: DocumentId, doc: Document) {
        self.entries.insert(id, doc);
    }

    /// Removes a document, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.entries.remove(id)
    }

    /// Looks up a document by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.entries.get(id)
    }

    /// Returns whether the index holds an entry for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no documents are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all (id, document) entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentId, &Document)> {
        self.entries.iter()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
