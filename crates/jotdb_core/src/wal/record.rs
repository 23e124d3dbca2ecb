//! WAL record type and line codec.

use crate::error::{CoreError, CoreResult};
use crate::types::{Document, DocumentId, OpType, Operation, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One durable operation, stored as a single JSON line:
///
/// ```json
/// {"seq":7,"ts":"2024-01-01T00:00:00Z","op":"insert","coll":"users","id":"u1","doc":{...}}
/// ```
///
/// `doc` is the new document for insert/update and `null` for delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Strictly monotonic sequence number.
    pub seq: SequenceNumber,
    /// Time the record was appended.
    pub ts: DateTime<Utc>,
    /// Operation kind.
    pub op: OpType,
    /// Target collection.
    pub coll: String,
    /// Target document ID.
    pub id: DocumentId,
    /// New document, or `None` for delete.
    pub doc: Option<Document>,
}

impl WalRecord {
    /// Builds a record for a buffered operation.
    #[must_use]
    pub fn from_operation(seq: SequenceNumber, ts: DateTime<Utc>, op: &Operation) -> Self {
        Self {
            seq,
            ts,
            op: op.op,
            coll: op.collection.clone(),
            id: op.id.clone(),
            doc: op.document.clone(),
        }
    }

    /// Converts back to the operation it logs, for replay.
    #[must_use]
    pub fn to_operation(&self) -> Operation {
        Operation {
            op: self.op,
            collection: self.coll.clone(),
            id: self.id.clone(),
            document: self.doc.clone(),
        }
    }

    /// Serializes the record as one JSON line (no trailing newline).
    pub fn encode_line(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one JSON line.
    pub fn decode_line(line: &str) -> CoreResult<Self> {
        serde_json::from_str(line).map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn line_round_trip() {
        let op = Operation::insert(
            "users",
            DocumentId::new("u1").unwrap(),
            doc(json!({"name": "Alice"})),
        );
        let record = WalRecord::from_operation(SequenceNumber::new(7), Utc::now(), &op);

        let line = record.encode_line().unwrap();
        assert!(!line.contains('\n'));

        let decoded = WalRecord::decode_line(&line).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn delete_serializes_null_doc() {
        let op = Operation::delete("users", DocumentId::new("u1").unwrap());
        let record = WalRecord::from_operation(SequenceNumber::new(1), Utc::now(), &op);

        let line = record.encode_line().unwrap();
        assert!(line.contains("\"doc\":null"));
        assert!(line.contains("\"op\":\"delete\""));
    }

    #[test]
    fn field_names_match_wire_schema() {
        let op = Operation::update(
            "users",
            DocumentId::new("u1").unwrap(),
            doc(json!({"a": 1})),
        );
        let record = WalRecord::from_operation(SequenceNumber::new(3), Utc::now(), &op);
        let value: serde_json::Value =
            serde_json::from_str(&record.encode_line().unwrap()).unwrap();

        for key in ["seq", "ts", "op", "coll", "id", "doc"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["seq"], json!(3));
        assert_eq!(value["op"], json!("update"));
    }

    #[test]
    fn to_operation_inverts_from_operation() {
        let op = Operation::update(
            "posts",
            DocumentId::new("p1").unwrap(),
            doc(json!({"title": "hello"})),
        );
        let record = WalRecord::from_operation(SequenceNumber::new(2), Utc::now(), &op);
        assert_eq!(record.to_operation(), op);
    }

    #[test]
    fn garbage_line_fails() {
        assert!(WalRecord::decode_line("{nope").is_err());
    }
}
