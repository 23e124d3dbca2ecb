//! Index manager: primary and secondary indexes with persistence and
//! rebuild.

use crate::error::{CoreError, CoreResult};
use crate::index::primary::PrimaryIndex;
use crate::index::secondary::{SecondaryIndex, SecondaryIndexFile};
use crate::storage::{self, StorageEngine};
use crate::types::{Document, DocumentId, OpType};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Manages all in-memory indexes and their on-disk projections.
///
/// The primary index per collection is persisted implicitly by the
/// collection file itself (a full id→document map); secondary indexes are
/// persisted one file per (collection, field) as
/// `<collection>_idx_<field>.json`. Persisted secondary indexes are an
/// optimization, never the source of truth: anything that fails to load
/// or validate is discarded and rebuilt from storage.
///
/// ## Locking
///
/// Each index carries its own reader/writer latch. [`Self::update_indexes`]
/// acquires secondary latches in field-lexicographic order and mutates the
/// primary *last*, so the pre-image needed to unpost a replaced document
/// is always still available.
pub struct IndexManager {
    /// Directory holding persisted index files (same as the data dir).
    data_dir: PathBuf,
    /// Whether persisted index writes fsync.
    sync_writes: bool,
    /// Storage engine used for seeding and rebuilds.
    storage: Arc<StorageEngine>,
    /// Primary index per collection.
    primaries: RwLock<HashMap<String, Arc<RwLock<PrimaryIndex>>>>,
    /// Secondary indexes per collection, keyed by field in lexicographic
    /// order.
    secondaries: RwLock<HashMap<String, BTreeMap<String, Arc<RwLock<SecondaryIndex>>>>>,
}

impl IndexManager {
    /// Creates an index manager backed by `storage`.
    #[must_use]
    pub fn new(storage: Arc<StorageEngine>, sync_writes: bool) -> Self {
        Self {
            data_dir: storage.data_dir().to_path_buf(),
            sync_writes,
            storage,
            primaries: RwLock::new(HashMap::new()),
            secondaries: RwLock::new(HashMap::new()),
        }
    }

    /// Creates (or re-seeds an empty) primary index for a collection.
    ///
    /// Idempotent: an existing non-empty primary is left untouched.
    pub fn create_primary_index(&self, collection: &str) -> CoreResult<()> {
        if let Some(primary) = self.primaries.read().get(collection) {
            if !primary.read().is_empty() {
                return Ok(());
            }
        }

        let entries = self.storage.snapshot_collection(collection)?;
        let index = PrimaryIndex::from_entries(entries);

        let mut primaries = self.primaries.write();
        primaries.insert(collection.to_string(), Arc::new(RwLock::new(index)));
        Ok(())
    }

    /// Creates a secondary index on `field`, scanning storage to build the
    /// posting map and persisting it immediately.
    ///
    /// Idempotent: an existing index on the same field is left untouched.
    pub fn create_secondary_index(&self, collection: &str, field: &str) -> CoreResult<()> {
        if field.is_empty() {
            return Err(CoreError::invalid_argument("index field must not be empty"));
        }
        if self
            .secondaries
            .read()
            .get(collection)
            .is_some_and(|fields| fields.contains_key(field))
        {
            return Ok(());
        }

        let entries = self.storage.snapshot_collection(collection)?;
        let index = SecondaryIndex::from_entries(
            collection,
            field,
            entries.iter().map(|(id, doc)| (id, doc)),
        );
        self.persist_one(&index)?;

        self.secondaries
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string(), Arc::new(RwLock::new(index)));
        Ok(())
    }

    /// O(1) lookup of a document by primary ID.
    ///
    /// Returns `None` if the document does not exist or the collection has
    /// no primary index yet.
    #[must_use]
    pub fn lookup_primary(&self, collection: &str, id: &str) -> Option<Document> {
        let primary = Arc::clone(self.primaries.read().get(collection)?);
        let found = primary.read().get(id).cloned();
        found
    }

    /// Equality lookup of document IDs by indexed field value.
    ///
    /// Result ordering is unspecified but stable within one process
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no index exists on (collection, field).
    pub fn lookup_secondary(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<DocumentId>> {
        let index = self.secondary(collection, field).ok_or_else(|| {
            CoreError::invalid_argument(format!("no secondary index on {collection}.{field}"))
        })?;
        let ids = index.read().lookup(value);
        Ok(ids)
    }

    /// Equality lookup resolving matching IDs to documents through the
    /// primary index. This is the form the query layer consumes.
    pub fn lookup_secondary_docs(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        let ids = self.lookup_secondary(collection, field, value)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| {
                let doc = self.lookup_primary(collection, id.as_str())?;
                Some((id, doc))
            })
            .collect())
    }

    /// Lists the fields with a secondary index on `collection`, in
    /// lexicographic order.
    #[must_use]
    pub fn list_secondary_indexes(&self, collection: &str) -> Vec<String> {
        self.secondaries
            .read()
            .get(collection)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the secondary index on `field` and deletes its persisted
    /// file.
    pub fn drop_secondary_index(&self, collection: &str, field: &str) -> CoreResult<()> {
        if let Some(fields) = self.secondaries.write().get_mut(collection) {
            fields.remove(field);
        }
        match fs::remove_file(self.index_path(collection, field)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Maintains every known index for one storage mutation.
    ///
    /// `new_doc` carries the document for Insert/Update and is `None` for
    /// Delete. The pre-image is fetched from the primary index (or from
    /// storage while the primary is cold), secondary postings are swapped
    /// under each index's own latch in field order, and the primary is
    /// updated last.
    pub fn update_indexes(
        &self,
        collection: &str,
        id: &DocumentId,
        new_doc: Option<&Document>,
        op: OpType,
    ) -> CoreResult<()> {
        let primary = self.primary_or_default(collection);

        let old_doc = match primary.read().get(id.as_str()).cloned() {
            Some(doc) => Some(doc),
            None => self.storage.read_document_unlatched(collection, id.as_str())?,
        };

        for (_, index) in self.collection_secondaries(collection) {
            let mut index = index.write();
            if let Some(old) = &old_doc {
                index.remove(id, old);
            }
            if let Some(new) = new_doc {
                index.insert(id, new);
            }
        }

        let mut primary = primary.write();
        match op {
            OpType::Insert | OpType::Update => {
                if let Some(new) = new_doc {
                    primary.insert(id.clone(), new.clone());
                }
            }
            OpType::Delete => {
                primary.remove(id.as_str());
            }
        }
        Ok(())
    }

    /// Writes every secondary index of a collection to disk.
    pub fn persist_indexes(&self, collection: &str) -> CoreResult<()> {
        for (_, index) in self.collection_secondaries(collection) {
            let index = index.read();
            self.persist_one(&index)?;
        }
        Ok(())
    }

    /// Loads persisted secondary indexes for a collection.
    ///
    /// Requires the primary index to be seeded first: every loaded posting
    /// is validated against the primary, and a file that is corrupt or
    /// references unknown documents is discarded and rebuilt from storage.
    pub fn load_indexes(&self, collection: &str) -> CoreResult<()> {
        let prefix = format!("{collection}_idx_");

        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(field) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };

            match self.load_one(collection, field) {
                Ok(index) => {
                    self.secondaries
                        .write()
                        .entry(collection.to_string())
                        .or_default()
                        .insert(field.to_string(), Arc::new(RwLock::new(index)));
                }
                Err(e) => {
                    warn!(
                        collection,
                        field,
                        error = %e,
                        "discarding persisted secondary index, rebuilding from storage"
                    );
                    self.rebuild_field(collection, field)?;
                }
            }
        }
        Ok(())
    }

    /// Re-derives every index of a collection from storage and persists
    /// the secondary indexes.
    ///
    /// For a fixed storage state this produces posting sets identical to
    /// those maintained incrementally by [`Self::update_indexes`].
    pub fn rebuild_indexes(&self, collection: &str) -> CoreResult<()> {
        let entries = self.storage.snapshot_collection(collection)?;

        let primary = self.primary_or_default(collection);
        *primary.write() = PrimaryIndex::from_entries(entries.clone());

        for (field, index) in self.collection_secondaries(collection) {
            let rebuilt = SecondaryIndex::from_entries(
                collection,
                field.as_str(),
                entries.iter().map(|(id, doc)| (id, doc)),
            );
            self.persist_one(&rebuilt)?;
            *index.write() = rebuilt;
        }
        Ok(())
    }

    /// Returns the collections that currently have a primary index.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.primaries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Path of the persisted index file for (collection, field).
    fn index_path(&self, collection: &str, field: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}_idx_{field}.json"))
    }

    /// Returns the primary index handle, creating an empty one on first
    /// touch.
    fn primary_or_default(&self, collection: &str) -> Arc<RwLock<PrimaryIndex>> {
        if let Some(primary) = self.primaries.read().get(collection) {
            return Arc::clone(primary);
        }
        let mut primaries = self.primaries.write();
        Arc::clone(
            primaries
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(PrimaryIndex::new()))),
        )
    }

    /// Snapshot of a collection's secondary index handles in field order.
    fn collection_secondaries(&self, collection: &str) -> Vec<(String, Arc<RwLock<SecondaryIndex>>)> {
        self.secondaries
            .read()
            .get(collection)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, index)| (field.clone(), Arc::clone(index)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns one secondary index handle.
    fn secondary(&self, collection: &str, field: &str) -> Option<Arc<RwLock<SecondaryIndex>>> {
        self.secondaries
            .read()
            .get(collection)
            .and_then(|fields| fields.get(field))
            .map(Arc::clone)
    }

    /// Persists one secondary index atomically.
    fn persist_one(&self, index: &SecondaryIndex) -> CoreResult<()> {
        let path = self.index_path(index.collection(), index.field());
        let data = serde_json::to_vec_pretty(&index.to_file())?;
        storage::atomic_write(&path, &data, self.sync_writes)
    }

    /// Loads and validates one persisted secondary index.
    fn load_one(&self, collection: &str, field: &str) -> CoreResult<SecondaryIndex> {
        let path = self.index_path(collection, field);
        let data = fs::read(&path)?;
        let file: SecondaryIndexFile =
            serde_json::from_slice(&data).map_err(|e| CoreError::corrupt(&path, e.to_string()))?;

        if file.collection != collection || file.field != field {
            return Err(CoreError::corrupt(
                &path,
                format!(
                    "index file claims ({}, {}), expected ({collection}, {field})",
                    file.collection, file.field
                ),
            ));
        }

        let index = SecondaryIndex::from_file(file);
        let primary = self.primary_or_default(collection);
        index.validate_against(&primary.read(), &path)?;
        Ok(index)
    }

    /// Rebuilds a single field index from storage and persists it.
    fn rebuild_field(&self, collection: &str, field: &str) -> CoreResult<()> {
        let entries = self.storage.snapshot_collection(collection)?;
        let index = SecondaryIndex::from_entries(
            collection,
            field,
            entries.iter().map(|(id, doc)| (id, doc)),
        );
        self.persist_one(&index)?;
        self.secondaries
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string(), Arc::new(RwLock::new(index)));
        Ok(())
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("data_dir", &self.data_dir)
            .field("collections", &self.collections())
            .finish_non_exhaustive()
    }
}
