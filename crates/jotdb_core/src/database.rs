//! Database facade: startup, recovery, checkpointing, and teardown.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexManager;
use crate::storage::StorageEngine;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{Document, DocumentId, OpType, SequenceNumber};
use crate::wal::WalManager;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The main database handle.
///
/// Opening a database wires the four subsystems together and runs
/// recovery:
///
/// 1. Validate configuration and create the data and WAL directories.
/// 2. Open storage and seed a primary index per on-disk collection
///    (a collection file that fails to parse is fatal here).
/// 3. Load persisted secondary indexes, rebuilding any that are corrupt.
/// 4. Replay the WAL into storage and indexes, then truncate it. The WAL
///    wins wherever it and storage disagree.
///
/// # Example
///
/// ```rust,ignore
/// use jotdb_core::{Config, Database};
///
/// let db = Database::open(Config::new().data_dir("./data").wal_dir("./wal"))?;
/// db.create_collection("users")?;
///
/// let mut txn = db.begin()?;
/// txn.insert("users", "u1", serde_json::json!({"name": "Alice"})
///     .as_object().unwrap().clone())?;
/// db.commit(&mut txn)?;
/// ```
pub struct Database {
    config: Config,
    storage: Arc<StorageEngine>,
    indexes: Arc<IndexManager>,
    wal: Arc<WalManager>,
    txns: TransactionManager,
    /// Committed operations since the last checkpoint.
    ops_since_checkpoint: AtomicU64,
    /// When the last checkpoint ran.
    last_checkpoint: Mutex<Instant>,
    /// Serializes checkpoints (and close's persist pass). Two commits can
    /// cross a threshold at the same time; without this they would race
    /// on the same index temp files.
    checkpoint_lock: Mutex<()>,
    /// Set when a commit was durable but could not be fully applied.
    /// While set, checkpoints must not truncate the WAL: the pending
    /// records are the only copy of that commit.
    replay_pending: AtomicBool,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database, running WAL recovery.
    ///
    /// # Errors
    ///
    /// - `Config` for invalid configuration.
    /// - `Corrupt` for an unreadable collection file (fatal by design;
    ///   collection files are the source of truth).
    /// - `ReplayFailed` for interior WAL corruption.
    pub fn open(config: Config) -> CoreResult<Self> {
        config.validate()?;

        let storage = Arc::new(StorageEngine::open(&config.data_dir, config.sync_writes)?);
        let indexes = Arc::new(IndexManager::new(Arc::clone(&storage), config.sync_writes));
        let wal = Arc::new(WalManager::open(&config.wal_dir, config.sync_writes)?);

        for collection in storage.list_collections()? {
            indexes.create_primary_index(&collection)?;
            indexes.load_indexes(&collection)?;
        }

        Self::replay(&storage, &indexes, &wal)?;

        let txns = TransactionManager::new(
            Arc::clone(&storage),
            Arc::clone(&indexes),
            Arc::clone(&wal),
            config.max_concurrent_transactions,
        );

        Ok(Self {
            config,
            storage,
            indexes,
            wal,
            txns,
            ops_since_checkpoint: AtomicU64::new(0),
            last_checkpoint: Mutex::new(Instant::now()),
            checkpoint_lock: Mutex::new(()),
            replay_pending: AtomicBool::new(false),
            is_open: RwLock::new(true),
        })
    }

    /// Re-applies every WAL record to storage, rebuilds the indexes of
    /// the collections the log mentions, then truncates the log.
    ///
    /// Re-application is an upsert or an idempotent delete, so records
    /// whose effects already reached storage before the crash change
    /// nothing. A collection named by the WAL but missing on disk is
    /// created: the WAL is the source of truth.
    ///
    /// Indexes are rebuilt from post-replay storage rather than patched
    /// incrementally: a persisted index can hold a posting that predates
    /// a replayed update, and once storage already carries the new
    /// document the pre-image needed to unpost it is gone. Rebuilding
    /// sidesteps the whole class.
    fn replay(
        storage: &Arc<StorageEngine>,
        indexes: &Arc<IndexManager>,
        wal: &Arc<WalManager>,
    ) -> CoreResult<()> {
        let records = wal.read_records()?;
        if records.is_empty() {
            return Ok(());
        }

        let mut touched = BTreeSet::new();
        for record in &records {
            let op = record.to_operation();
            touched.insert(op.collection.clone());

            let applied = (|| -> CoreResult<()> {
                if !storage.collection_exists(&op.collection) {
                    storage.create_collection(&op.collection)?;
                }
                match op.op {
                    OpType::Insert | OpType::Update => {
                        let doc = op.document.clone().ok_or_else(|| {
                            CoreError::replay_failed(format!(
                                "record {} has op {} but no document",
                                record.seq, op.op
                            ))
                        })?;
                        storage.write_document(&op.collection, op.id.as_str(), doc)?;
                    }
                    OpType::Delete => {
                        storage.delete_document(&op.collection, op.id.as_str())?;
                    }
                }
                Ok(())
            })();

            applied.map_err(|e| {
                CoreError::replay_failed(format!("applying record {}: {e}", record.seq))
            })?;
        }

        for collection in &touched {
            indexes.rebuild_indexes(collection)?;
        }
        wal.reset()?;

        info!(records = records.len(), collections = touched.len(), "WAL replay complete");
        Ok(())
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txns.begin()
    }

    /// Commits a transaction and runs a checkpoint if a threshold has
    /// been crossed.
    ///
    /// Returns the sequence number of the transaction's last WAL record,
    /// or `None` for an empty transaction.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Option<SequenceNumber>> {
        self.ensure_open()?;
        let ops = txn.op_count() as u64;
        let seq = match self.txns.commit(txn) {
            Ok(seq) => seq,
            Err(e) => {
                if matches!(e, CoreError::CommitPendingReplay { .. }) {
                    self.replay_pending.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };

        self.ops_since_checkpoint.fetch_add(ops, Ordering::SeqCst);
        if let Err(e) = self.maybe_checkpoint() {
            // The commit is already durable; a failed checkpoint only
            // delays WAL truncation.
            warn!(error = %e, "post-commit checkpoint failed");
        }
        Ok(seq)
    }

    /// Rolls a transaction back.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.rollback(txn)
    }

    /// Reads a document as seen by a transaction (read-your-writes).
    pub fn read(
        &self,
        txn: &Transaction,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        self.txns.read(txn, collection, id)
    }

    /// Reads the latest committed version of a document.
    pub fn get(&self, collection: &str, id: &str) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        if let Some(doc) = self.indexes.lookup_primary(collection, id) {
            return Ok(Some(doc));
        }
        match self.storage.read_document(collection, id) {
            Ok(doc) => Ok(Some(doc)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates a collection and its primary index.
    pub fn create_collection(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.storage.create_collection(name)?;
        self.indexes.create_primary_index(name)
    }

    /// Lists the collections present on disk.
    pub fn list_collections(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        self.storage.list_collections()
    }

    /// Creates a secondary index on a field, building and persisting it.
    pub fn create_secondary_index(&self, collection: &str, field: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.indexes.create_secondary_index(collection, field)
    }

    /// O(1) committed-state lookup by primary ID.
    pub fn lookup_primary(&self, collection: &str, id: &str) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        Ok(self.indexes.lookup_primary(collection, id))
    }

    /// Equality lookup of document IDs through a secondary index.
    pub fn lookup_secondary(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<DocumentId>> {
        self.ensure_open()?;
        self.indexes.lookup_secondary(collection, field, value)
    }

    /// Equality lookup resolving matches to documents.
    pub fn lookup_secondary_docs(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.ensure_open()?;
        self.indexes.lookup_secondary_docs(collection, field, value)
    }

    /// Invokes `visitor` per (id, document) under the collection's reader
    /// latch; the visitor returns `false` to stop early. See
    /// [`StorageEngine::scan_collection`] for the restrictions on
    /// visitors.
    pub fn scan_collection<F>(&self, collection: &str, visitor: F) -> CoreResult<()>
    where
        F: FnMut(&DocumentId, &Document) -> bool,
    {
        self.ensure_open()?;
        self.storage.scan_collection(collection, visitor)
    }

    /// Copies out every (id, document) pair of a collection.
    pub fn snapshot_collection(
        &self,
        collection: &str,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.ensure_open()?;
        self.storage.snapshot_collection(collection)
    }

    /// Forces a checkpoint: persists all secondary indexes and truncates
    /// the WAL. Storage is unchanged: every committed operation already
    /// reached its collection file at commit time.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.replay_pending.load(Ordering::SeqCst) {
            return Err(CoreError::replay_failed(
                "a durable commit is awaiting replay; reopen the database to recover",
            ));
        }

        // One checkpoint at a time: persist_one writes each index through
        // a deterministic temp path, so concurrent checkpoints would
        // clobber each other's temp files.
        let _guard = self.checkpoint_lock.lock();

        for collection in self.indexes.collections() {
            self.indexes.persist_indexes(&collection)?;
        }
        self.wal.reset()?;

        self.ops_since_checkpoint.store(0, Ordering::SeqCst);
        *self.last_checkpoint.lock() = Instant::now();
        debug!("checkpoint complete");
        Ok(())
    }

    /// Current WAL size in bytes. Zero right after a checkpoint.
    pub fn wal_size(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        self.wal.size()
    }

    /// Number of currently active transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.txns.active_count()
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks whether the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Persists index state, releases advisory locks, and marks the
    /// database closed. Idempotent.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        // Serialize against an in-flight checkpoint's persist pass.
        let _guard = self.checkpoint_lock.lock();

        for collection in self.indexes.collections() {
            self.indexes.persist_indexes(&collection)?;
        }
        self.storage.close();
        *is_open = false;
        Ok(())
    }

    /// Runs a checkpoint when the operation-count or elapsed-time
    /// threshold has been crossed.
    fn maybe_checkpoint(&self) -> CoreResult<()> {
        let ops_due = self.ops_since_checkpoint.load(Ordering::SeqCst) >= self.config.checkpoint_ops;
        let time_due = self.last_checkpoint.lock().elapsed() >= self.config.checkpoint_interval();

        if ops_due || time_due {
            debug!(ops_due, time_due, "checkpoint threshold crossed");
            self.checkpoint()?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("is_open", &self.is_open())
            .field("active_transactions", &self.active_transactions())
            .finish_non_exhaustive()
    }
}
