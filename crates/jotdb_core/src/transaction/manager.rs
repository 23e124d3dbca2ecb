//! Transaction manager: buffered commits with WAL-first durability.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexManager;
use crate::storage::StorageEngine;
use crate::transaction::state::Transaction;
use crate::types::{Document, OpType, SequenceNumber, TransactionId};
use crate::wal::WalManager;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Drives transactions through the WAL-then-storage-then-index commit
/// pipeline.
///
/// ## Commit protocol
///
/// 1. Acquire the writer latch of every touched collection in
///    lexicographic order. This total order is the structural reason two
///    overlapping commits cannot deadlock.
/// 2. Append one WAL record per buffered operation and fsync once. This
///    fsync is the commit boundary: before it, failure aborts the
///    transaction with nothing mutated; after it, the transaction is
///    durable no matter what.
/// 3. Apply each operation to storage (atomic file swap per operation).
/// 4. Apply each operation to the indexes.
/// 5. Release the latches in reverse order.
/// 6. Mark the transaction committed.
///
/// A failure in steps 3–4 surfaces as [`CoreError::CommitPendingReplay`]:
/// the caller must not retry, because WAL replay on the next open will
/// complete the commit.
pub struct TransactionManager {
    storage: Arc<StorageEngine>,
    indexes: Arc<IndexManager>,
    wal: Arc<WalManager>,
    next_txid: AtomicU64,
    /// Currently active transaction IDs, bounded by `max_concurrent`.
    active: Mutex<HashSet<TransactionId>>,
    max_concurrent: usize,
}

impl TransactionManager {
    /// Creates a transaction manager over the three lower subsystems.
    #[must_use]
    pub fn new(
        storage: Arc<StorageEngine>,
        indexes: Arc<IndexManager>,
        wal: Arc<WalManager>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            storage,
            indexes,
            wal,
            next_txid: AtomicU64::new(1),
            active: Mutex::new(HashSet::new()),
            max_concurrent,
        }
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionLimit` when the configured maximum number of
    /// concurrent transactions is already active.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let mut active = self.active.lock();
        if active.len() >= self.max_concurrent {
            return Err(CoreError::TransactionLimit {
                max: self.max_concurrent,
            });
        }

        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        active.insert(id);
        Ok(Transaction::new(id))
    }

    /// Reads a document as seen by the transaction: buffered writes
    /// first (last write per id wins, a buffered delete reads as absent),
    /// then the committed state.
    ///
    /// There is no snapshot: the committed fallback sees the latest
    /// committed state at each call.
    pub fn read(
        &self,
        txn: &Transaction,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Document>> {
        txn.ensure_active()?;

        if let Some(buffered) = txn.buffered_read(collection, id) {
            return Ok(buffered.cloned());
        }

        if let Some(doc) = self.indexes.lookup_primary(collection, id) {
            return Ok(Some(doc));
        }

        match self.storage.read_document(collection, id) {
            Ok(doc) => Ok(Some(doc)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Commits the transaction, making all of its operations durable and
    /// visible atomically.
    ///
    /// Returns the sequence number of the transaction's last WAL record,
    /// or `None` for an empty buffer.
    ///
    /// # Errors
    ///
    /// - `CommitFailed`: nothing was mutated; the transaction is rolled
    ///   back.
    /// - `CommitPendingReplay`: the transaction is durable but not fully
    ///   applied; it will be completed by replay on the next open. Do not
    ///   retry.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Option<SequenceNumber>> {
        txn.ensure_active()?;

        if txn.op_count() == 0 {
            txn.mark_committed();
            self.deregister(txn.id());
            return Ok(None);
        }

        // Step 1: collection writer latches, lexicographic order.
        let collections = txn.collections();
        let latches: Vec<_> = collections
            .iter()
            .map(|name| self.storage.latch(name))
            .collect();
        let mut guards: Vec<_> = latches.iter().map(|latch| latch.write()).collect();

        // Inserts and updates need their target collection; verify before
        // anything is logged so the failure is a clean abort.
        let mut missing_collection: Option<String> = None;
        for op in txn.operations() {
            if matches!(op.op, OpType::Insert | OpType::Update)
                && !self.storage.collection_exists(&op.collection)
            {
                missing_collection = Some(op.collection.clone());
                break;
            }
        }
        if let Some(collection) = missing_collection {
            while let Some(guard) = guards.pop() {
                drop(guard);
            }
            txn.mark_rolled_back();
            self.deregister(txn.id());
            return Err(CoreError::commit_failed(format!(
                "no such collection: {}",
                collection
            )));
        }

        // Step 2: WAL append + fsync. The commit boundary.
        let last_seq = match self.wal.append_transaction(txn.operations()) {
            Ok(seq) => seq,
            Err(e) => {
                while let Some(guard) = guards.pop() {
                    drop(guard);
                }
                txn.mark_rolled_back();
                self.deregister(txn.id());
                return Err(CoreError::commit_failed(format!("WAL append failed: {e}")));
            }
        };
        let sequence = last_seq.map_or(0, SequenceNumber::as_u64);

        // Steps 3 and 4: apply to storage, then to indexes. From here on
        // the transaction is durable; failures defer to replay.
        let apply = (|| -> CoreResult<()> {
            for op in txn.operations() {
                match op.op {
                    OpType::Insert | OpType::Update => {
                        let doc = op
                            .document
                            .clone()
                            .ok_or_else(|| CoreError::commit_failed("write without document"))?;
                        self.storage
                            .write_document_locked(&op.collection, &op.id, doc)?;
                    }
                    OpType::Delete => {
                        self.storage.delete_document_locked(&op.collection, &op.id)?;
                    }
                }
            }
            for op in txn.operations() {
                self.indexes
                    .update_indexes(&op.collection, &op.id, op.document.as_ref(), op.op)?;
            }
            Ok(())
        })();

        // Step 5: release latches in reverse order.
        while let Some(guard) = guards.pop() {
            drop(guard);
        }

        // Step 6.
        txn.mark_committed();
        self.deregister(txn.id());

        match apply {
            Ok(()) => {
                debug!(txn = %txn.id(), ops = txn.op_count(), seq = sequence, "committed");
                Ok(last_seq)
            }
            Err(e) => Err(CoreError::commit_pending_replay(sequence, e.to_string())),
        }
    }

    /// Rolls the transaction back, discarding its buffer. Cheap and
    /// always succeeds for an active transaction.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        txn.mark_rolled_back();
        self.deregister(txn.id());
        Ok(())
    }

    /// Number of currently active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn deregister(&self, id: TransactionId) {
        self.active.lock().remove(&id);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<StorageEngine>,
        indexes: Arc<IndexManager>,
        manager: TransactionManager,
    }

    fn fixture() -> Fixture {
        fixture_with_limit(100)
    }

    fn fixture_with_limit(max: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Arc::new(StorageEngine::open(dir.path().join("data"), true).unwrap());
        let indexes = Arc::new(IndexManager::new(Arc::clone(&storage), true));
        let wal = Arc::new(WalManager::open(dir.path().join("wal"), true).unwrap());
        storage.create_collection("users").unwrap();
        storage.create_collection("posts").unwrap();
        indexes.create_primary_index("users").unwrap();
        indexes.create_primary_index("posts").unwrap();
        let manager =
            TransactionManager::new(Arc::clone(&storage), Arc::clone(&indexes), wal, max);
        Fixture {
            _dir: dir,
            storage,
            indexes,
            manager,
        }
    }

    #[test]
    fn begin_assigns_fresh_ids() {
        let f = fixture();
        let t1 = f.manager.begin().unwrap();
        let t2 = f.manager.begin().unwrap();
        assert_ne!(t1.id(), t2.id());
        assert_eq!(f.manager.active_count(), 2);
    }

    #[test]
    fn transaction_limit_enforced() {
        let f = fixture_with_limit(2);
        let _t1 = f.manager.begin().unwrap();
        let _t2 = f.manager.begin().unwrap();
        assert!(matches!(
            f.manager.begin(),
            Err(CoreError::TransactionLimit { max: 2 })
        ));
    }

    #[test]
    fn limit_frees_after_termination() {
        let f = fixture_with_limit(1);
        let mut t1 = f.manager.begin().unwrap();
        f.manager.rollback(&mut t1).unwrap();
        assert!(f.manager.begin().is_ok());
    }

    #[test]
    fn read_your_writes() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("users", "u1", doc(json!({"v": 1}))).unwrap();

        let read = f.manager.read(&txn, "users", "u1").unwrap();
        assert_eq!(read, Some(doc(json!({"v": 1}))));
    }

    #[test]
    fn buffered_delete_reads_as_absent() {
        let f = fixture();
        f.storage
            .write_document("users", "u1", doc(json!({"v": 1})))
            .unwrap();
        f.indexes.rebuild_indexes("users").unwrap();

        let mut txn = f.manager.begin().unwrap();
        txn.delete("users", "u1").unwrap();
        assert_eq!(f.manager.read(&txn, "users", "u1").unwrap(), None);
    }

    #[test]
    fn uncommitted_writes_invisible_outside() {
        let f = fixture();
        let mut writer = f.manager.begin().unwrap();
        writer.insert("users", "u1", doc(json!({"v": 1}))).unwrap();

        let reader = f.manager.begin().unwrap();
        assert_eq!(f.manager.read(&reader, "users", "u1").unwrap(), None);
    }

    #[test]
    fn commit_applies_to_storage_and_indexes() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("users", "u1", doc(json!({"city": "Mumbai"})))
            .unwrap();
        let seq = f.manager.commit(&mut txn).unwrap();
        assert!(seq.is_some());

        assert_eq!(
            f.storage.read_document("users", "u1").unwrap(),
            doc(json!({"city": "Mumbai"}))
        );
        assert_eq!(
            f.indexes.lookup_primary("users", "u1"),
            Some(doc(json!({"city": "Mumbai"})))
        );
    }

    #[test]
    fn commit_empty_transaction() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        assert_eq!(f.manager.commit(&mut txn).unwrap(), None);
        assert_eq!(f.manager.active_count(), 0);
    }

    #[test]
    fn commit_to_missing_collection_is_clean_abort() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("ghosts", "g1", doc(json!({"v": 1}))).unwrap();

        let result = f.manager.commit(&mut txn);
        assert!(matches!(result, Err(CoreError::CommitFailed { .. })));
        assert!(!txn.is_active());
        // Nothing was logged, so nothing can replay.
        assert_eq!(f.manager.wal.read_records().unwrap().len(), 0);
    }

    #[test]
    fn cross_collection_commit_is_atomic() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("users", "u1", doc(json!({"n": 1}))).unwrap();
        txn.insert("posts", "p1", doc(json!({"n": 2}))).unwrap();
        f.manager.commit(&mut txn).unwrap();

        assert!(f.storage.read_document("users", "u1").is_ok());
        assert!(f.storage.read_document("posts", "p1").is_ok());
    }

    #[test]
    fn rollback_leaves_state_untouched() {
        let f = fixture();
        f.storage
            .write_document("users", "u1", doc(json!({"v": 1})))
            .unwrap();

        let mut txn = f.manager.begin().unwrap();
        txn.update("users", "u1", doc(json!({"v": 2}))).unwrap();
        txn.insert("users", "u2", doc(json!({"v": 3}))).unwrap();
        f.manager.rollback(&mut txn).unwrap();

        assert_eq!(
            f.storage.read_document("users", "u1").unwrap(),
            doc(json!({"v": 1}))
        );
        assert!(matches!(
            f.storage.read_document("users", "u2"),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(f.manager.wal.read_records().unwrap().len(), 0);
    }

    #[test]
    fn cannot_commit_twice() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("users", "u1", doc(json!({"v": 1}))).unwrap();
        f.manager.commit(&mut txn).unwrap();
        assert!(f.manager.commit(&mut txn).is_err());
    }

    #[test]
    fn cannot_rollback_after_commit() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        f.manager.commit(&mut txn).unwrap();
        assert!(f.manager.rollback(&mut txn).is_err());
    }

    #[test]
    fn last_wins_within_buffer() {
        let f = fixture();
        let mut txn = f.manager.begin().unwrap();
        txn.insert("users", "u1", doc(json!({"v": 1}))).unwrap();
        txn.delete("users", "u1").unwrap();
        txn.insert("users", "u1", doc(json!({"v": 3}))).unwrap();
        f.manager.commit(&mut txn).unwrap();

        assert_eq!(
            f.storage.read_document("users", "u1").unwrap(),
            doc(json!({"v": 3}))
        );
    }

    #[test]
    fn sequences_grow_across_commits() {
        let f = fixture();

        let mut t1 = f.manager.begin().unwrap();
        t1.insert("users", "u1", doc(json!({"v": 1}))).unwrap();
        let s1 = f.manager.commit(&mut t1).unwrap().unwrap();

        let mut t2 = f.manager.begin().unwrap();
        t2.insert("users", "u2", doc(json!({"v": 2}))).unwrap();
        let s2 = f.manager.commit(&mut t2).unwrap().unwrap();

        assert!(s2 > s1);
    }

    #[test]
    fn disjoint_transactions_commit_from_threads() {
        use std::thread;

        let f = fixture();
        let manager = Arc::new(f.manager);

        let handles: Vec<_> = [("users", "u"), ("posts", "p")]
            .into_iter()
            .map(|(coll, prefix)| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..10 {
                        let mut txn = manager.begin().unwrap();
                        txn.insert(coll, &format!("{prefix}{i}"), doc(json!({"i": i})))
                            .unwrap();
                        manager.commit(&mut txn).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(f.storage.snapshot_collection("users").unwrap().len(), 10);
        assert_eq!(f.storage.snapshot_collection("posts").unwrap().len(), 10);
    }
}
