//! Core type definitions for JotDB.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A JSON document: an ordered mapping from string keys to JSON values.
///
/// Documents are heterogeneous; the engine enforces no schema. Storage and
/// the WAL treat documents as opaque; only the index layer inspects fields.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a document, scoped to a collection.
///
/// IDs are assigned by the caller and must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document ID, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::invalid_argument("document ID must not be empty"));
        }
        Ok(Self(id))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing within a process and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Sequence number assigned to a WAL entry.
///
/// Sequence numbers are strictly monotonic across process restarts and
/// define the total order of durable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// The kind of a buffered or logged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Insert a new document.
    Insert,
    /// Replace an existing document.
    Update,
    /// Remove a document.
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A single buffered mutation within a transaction.
///
/// Insert and Update carry the new document; Delete carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// The kind of mutation.
    pub op: OpType,
    /// Target collection.
    pub collection: String,
    /// Target document ID.
    pub id: DocumentId,
    /// New document for Insert/Update, `None` for Delete.
    pub document: Option<Document>,
}

impl Operation {
    /// Creates an insert operation.
    #[must_use]
    pub fn insert(collection: impl Into<String>, id: DocumentId, document: Document) -> Self {
        Self {
            op: OpType::Insert,
            collection: collection.into(),
            id,
            document: Some(document),
        }
    }

    /// Creates an update operation.
    #[must_use]
    pub fn update(collection: impl Into<String>, id: DocumentId, document: Document) -> Self {
        Self {
            op: OpType::Update,
            collection: collection.into(),
            id,
            document: Some(document),
        }
    }

    /// Creates a delete operation.
    #[must_use]
    pub fn delete(collection: impl Into<String>, id: DocumentId) -> Self {
        Self {
            op: OpType::Delete,
            collection: collection.into(),
            id,
            document: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_rejects_empty() {
        assert!(DocumentId::new("").is_err());
        assert!(DocumentId::new("u1").is_ok());
    }

    #[test]
    fn document_id_borrows_as_str() {
        use std::collections::HashMap;
        let mut map: HashMap<DocumentId, u32> = HashMap::new();
        map.insert(DocumentId::new("u1").unwrap(), 1);
        assert_eq!(map.get("u1"), Some(&1));
    }

    #[test]
    fn sequence_number_next() {
        let s1 = SequenceNumber::new(5);
        assert_eq!(s1.next().as_u64(), 6);
    }

    #[test]
    fn transaction_id_ordering() {
        assert!(TransactionId::new(1) < TransactionId::new(2));
    }

    #[test]
    fn op_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OpType::Insert).unwrap(), "\"insert\"");
        assert_eq!(serde_json::to_string(&OpType::Delete).unwrap(), "\"delete\"");
    }

    #[test]
    fn delete_operation_has_no_document() {
        let op = Operation::delete("users", DocumentId::new("u1").unwrap());
        assert_eq!(op.op, OpType::Delete);
        assert!(op.document.is_none());
    }
}
