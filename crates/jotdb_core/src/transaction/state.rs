//! Transaction state: the buffered operation list.

use crate::error::{CoreError, CoreResult};
use crate::storage::validate_collection_name;
use crate::types::{Document, DocumentId, Operation, TransactionId};
use std::collections::BTreeSet;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Terminated by commit.
    Committed,
    /// Terminated by rollback.
    RolledBack,
}

/// A buffered multi-operation transaction.
///
/// Operations are appended to the buffer in call order and never touch
/// storage until commit. Reads within the transaction resolve against the
/// buffer first (last write per id wins), giving read-your-writes.
///
/// A transaction is owned by the caller that began it; sharing one across
/// threads is not supported. It is terminated exactly once, by commit or
/// rollback.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    ops: Vec<Operation>,
    /// Collections mentioned by the buffer; kept sorted so commit can
    /// acquire writer latches in lexicographic order.
    touched: BTreeSet<String>,
    state: TransactionState,
}

impl Transaction {
    /// Creates an empty active transaction.
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            ops: Vec::new(),
            touched: BTreeSet::new(),
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether the transaction can still accept operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Buffers an insert.
    pub fn insert(&mut self, collection: &str, id: &str, doc: Document) -> CoreResult<()> {
        self.push(Operation::insert(
            self.validated_collection(collection)?,
            DocumentId::new(id)?,
            doc,
        ))
    }

    /// Buffers an update.
    pub fn update(&mut self, collection: &str, id: &str, doc: Document) -> CoreResult<()> {
        self.push(Operation::update(
            self.validated_collection(collection)?,
            DocumentId::new(id)?,
            doc,
        ))
    }

    /// Buffers a delete.
    pub fn delete(&mut self, collection: &str, id: &str) -> CoreResult<()> {
        self.push(Operation::delete(
            self.validated_collection(collection)?,
            DocumentId::new(id)?,
        ))
    }

    /// Resolves a read against the buffer.
    ///
    /// Returns `None` if the buffer says nothing about (collection, id);
    /// `Some(Some(doc))` if the latest buffered write is an insert or
    /// update; `Some(None)` if it is a delete (which shadows any
    /// committed document).
    #[must_use]
    pub fn buffered_read(&self, collection: &str, id: &str) -> Option<Option<&Document>> {
        self.ops
            .iter()
            .rev()
            .find(|op| op.collection == collection && op.id.as_str() == id)
            .map(|op| op.document.as_ref())
    }

    /// The buffered operations in append order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// The distinct collections the buffer mentions, sorted.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.touched.iter().cloned().collect()
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
        self.ops.clear();
        self.touched.clear();
    }

    fn push(&mut self, op: Operation) -> CoreResult<()> {
        self.ensure_active()?;
        self.touched.insert(op.collection.clone());
        self.ops.push(op);
        Ok(())
    }

    fn validated_collection(&self, collection: &str) -> CoreResult<String> {
        validate_collection_name(collection)?;
        Ok(collection.to_string())
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_argument(format!(
                "{} already committed",
                self.id
            ))),
            TransactionState::RolledBack => Err(CoreError::invalid_argument(format!(
                "{} already rolled back",
                self.id
            ))),
        }
    }
}
