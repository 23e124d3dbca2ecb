//! Collection file schema.
//!
//! Each collection is one JSON file:
//!
//! ```json
//! {
//!   "metadata": {
//!     "collection": "users",
//!     "version": 1,
//!     "created_at": "2024-01-01T00:00:00Z",
//!     "document_count": 2
//!   },
//!   "documents": { "u1": { ... }, "u2": { ... } }
//! }
//! ```
//!
//! The in-memory representation is authoritative while the database is
//! running; the file is the durable projection, always written whole via
//! the atomic temp-and-rename protocol in the storage engine.

use crate::error::{CoreError, CoreResult};
use crate::types::{Document, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Schema version written into new collection files.
const FORMAT_VERSION: u32 = 1;

/// Metadata header of a collection file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name.
    pub collection: String,
    /// Schema version of the file format.
    pub version: u32,
    /// Creation time of the collection.
    pub created_at: DateTime<Utc>,
    /// Number of documents; recomputed on every write.
    pub document_count: usize,
}

/// In-memory image of one collection file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionFile {
    /// File metadata.
    pub metadata: CollectionMetadata,
    /// Documents keyed by ID. A `BTreeMap` keeps the serialized form
    /// deterministic.
    pub documents: BTreeMap<DocumentId, Document>,
}

impl CollectionFile {
    /// Creates an empty collection image.
    #[must_use]
    pub fn empty(name: &str) -> Self {
        Self {
            metadata: CollectionMetadata {
                collection: name.to_string(),
                version: FORMAT_VERSION,
                created_at: Utc::now(),
                document_count: 0,
            },
            documents: BTreeMap::new(),
        }
    }

    /// Serializes the collection to pretty-printed JSON bytes, refreshing
    /// `document_count` first.
    pub fn encode(&mut self) -> CoreResult<Vec<u8>> {
        self.metadata.document_count = self.documents.len();
        let bytes = serde_json::to_vec_pretty(self)?;
        Ok(bytes)
    }

    /// Parses a collection file, attributing parse failures to `path`.
    pub fn decode(data: &[u8], path: &Path) -> CoreResult<Self> {
        serde_json::from_slice(data).map_err(|e| CoreError::corrupt(path, e.to_string()))
    }
}
