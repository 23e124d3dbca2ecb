//! Storage engine: atomic per-collection file persistence.
//!
//! One `<name>.json` file per collection plus a `<name>.lock` advisory
//! sidecar. Every mutation rewrites the collection file whole through the
//! atomic temp-and-rename protocol, so a reader never observes a torn
//! file and a crash at any point leaves the previous valid file intact.
//!
//! ## Concurrency discipline
//!
//! A per-collection reader/writer latch grants many concurrent readers or
//! one writer. Reads never touch the advisory file lock: within one
//! process the writer latch already excludes mutation, and the atomic
//! rename makes a full-file read consistent. The advisory lock exists to
//! exclude *other processes* and is acquired only under the writer latch.

mod collection;
mod lock;

pub use collection::{CollectionFile, CollectionMetadata};
pub use lock::{LockGuard, LockRegistry};

use crate::error::{CoreError, CoreResult};
use crate::types::{Document, DocumentId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker reserved for persisted secondary index file names
/// (`<collection>_idx_<field>.json`); forbidden inside collection names so
/// index files can never shadow a collection.
const INDEX_FILE_MARKER: &str = "_idx_";

/// Per-collection file storage with reader/writer discipline.
pub struct StorageEngine {
    /// Directory holding collection files and lock sidecars.
    data_dir: PathBuf,
    /// Whether to fsync data before rename.
    sync_writes: bool,
    /// Per-collection reader/writer latches, created on first touch.
    latches: RwLock<HashMap<String, Arc<RwLock<()>>>>,
    /// Advisory lock registry (cross-process exclusion).
    locks: LockRegistry,
    /// Set once `close()` has run.
    closed: AtomicBool,
}

impl StorageEngine {
    /// Opens a storage engine rooted at `data_dir`, creating the
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>, sync_writes: bool) -> CoreResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        Ok(Self {
            locks: LockRegistry::new(data_dir.clone()),
            data_dir,
            sync_writes,
            latches: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Fails with `NoSuchCollection` if the collection was never created,
    /// `LockFailure` if the advisory lock cannot be obtained, and `Io` or
    /// `Serialization` on write failures. On any failure the previous
    /// file contents remain intact.
    pub fn write_document(&self, collection: &str, id: &str, doc: Document) -> CoreResult<()> {
        self.ensure_open()?;
        validate_collection_name(collection)?;
        let id = DocumentId::new(id)?;

        let latch = self.latch(collection);
        let _guard = latch.write();
        self.write_document_locked(collection, &id, doc)
    }

    /// Writer-latch-free variant of [`Self::write_document`] for callers
    /// (transaction commits) that already hold the collection's writer
    /// latch.
    pub(crate) fn write_document_locked(
        &self,
        collection: &str,
        id: &DocumentId,
        doc: Document,
    ) -> CoreResult<()> {
        let _file_lock = self.locks.acquire(collection)?;

        let path = self.collection_path(collection);
        let mut image = self
            .load_collection(collection)?
            .ok_or_else(|| CoreError::no_such_collection(collection))?;

        image.documents.insert(id.clone(), doc);
        self.write_collection_atomic(&path, &mut image)
    }

    /// Reads a document by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document does not exist, `Corrupt` if
    /// the collection file fails to parse, and `Io` on read failures.
    pub fn read_document(&self, collection: &str, id: &str) -> CoreResult<Document> {
        self.ensure_open()?;
        validate_collection_name(collection)?;

        let latch = self.latch(collection);
        let _guard = latch.read();

        let image = self.load_or_empty(collection)?;
        image
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(collection, id))
    }

    /// Removes a document. Deleting an absent document is not an error.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure`, `Corrupt`, `Io`, or `Serialization` on the
    /// corresponding failures.
    pub fn delete_document(&self, collection: &str, id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        validate_collection_name(collection)?;
        let id = DocumentId::new(id)?;

        let latch = self.latch(collection);
        let _guard = latch.write();
        self.delete_document_locked(collection, &id)
    }

    /// Writer-latch-free variant of [`Self::delete_document`].
    pub(crate) fn delete_document_locked(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> CoreResult<()> {
        let _file_lock = self.locks.acquire(collection)?;

        let path = self.collection_path(collection);
        let Some(mut image) = self.load_collection(collection)? else {
            // No collection file: nothing to delete, and no reason to
            // materialize an empty one.
            return Ok(());
        };

        if image.documents.remove(id.as_str()).is_none() {
            return Ok(());
        }
        self.write_collection_atomic(&path, &mut image)
    }

    /// Invokes `visitor` for every document in the collection. The
    /// visitor returns `true` to continue or `false` to stop; iteration
    /// order is unspecified.
    ///
    /// The visitor runs under the collection's reader latch: it must not
    /// block and must not call back into the engine for the same
    /// collection. Prefer [`Self::snapshot_collection`] when either
    /// restriction is a problem.
    pub fn scan_collection<F>(&self, collection: &str, mut visitor: F) -> CoreResult<()>
    where
        F: FnMut(&DocumentId, &Document) -> bool,
    {
        self.ensure_open()?;
        validate_collection_name(collection)?;

        let latch = self.latch(collection);
        let _guard = latch.read();

        let image = self.load_or_empty(collection)?;
        for (id, doc) in &image.documents {
            if !visitor(id, doc) {
                break;
            }
        }
        Ok(())
    }

    /// Returns a copied-out snapshot of every (id, document) pair in the
    /// collection.
    pub fn snapshot_collection(&self, collection: &str) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.ensure_open()?;
        validate_collection_name(collection)?;

        let latch = self.latch(collection);
        let _guard = latch.read();

        let image = self.load_or_empty(collection)?;
        Ok(image.documents.into_iter().collect())
    }

    /// Creates a new, empty collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionExists` if the collection file is already
    /// present, `InvalidArgument` for an unusable name, and `Io` on
    /// write failures.
    pub fn create_collection(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        validate_collection_name(name)?;

        let latch = self.latch(name);
        let _guard = latch.write();
        let _file_lock = self.locks.acquire(name)?;

        let path = self.collection_path(name);
        if path.exists() {
            return Err(CoreError::collection_exists(name));
        }

        let mut image = CollectionFile::empty(name);
        self.write_collection_atomic(&path, &mut image)
    }

    /// Enumerates the collections present on disk.
    pub fn list_collections(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(".json") {
                if !name.contains(INDEX_FILE_MARKER) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Releases all advisory locks. Subsequent operations fail with
    /// `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.locks.close();
    }

    /// Returns the writer/reader latch for a collection, creating it on
    /// first touch.
    pub(crate) fn latch(&self, collection: &str) -> Arc<RwLock<()>> {
        if let Some(latch) = self.latches.read().get(collection) {
            return Arc::clone(latch);
        }
        let mut latches = self.latches.write();
        Arc::clone(
            latches
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Returns whether the collection file exists on disk.
    pub(crate) fn collection_exists(&self, collection: &str) -> bool {
        self.collection_path(collection).exists()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.json"))
    }

    /// Reads and parses a collection file, or `None` if absent.
    fn load_collection(&self, collection: &str) -> CoreResult<Option<CollectionFile>> {
        let path = self.collection_path(collection);
        let data = match read_retry(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        CollectionFile::decode(&data, &path).map(Some)
    }

    /// Like [`Self::load_collection`] but synthesizes an empty image for
    /// an absent file, so reads and scans of a never-written collection
    /// behave as reads of an empty one.
    fn load_or_empty(&self, collection: &str) -> CoreResult<CollectionFile> {
        Ok(self
            .load_collection(collection)?
            .unwrap_or_else(|| CollectionFile::empty(collection)))
    }

    /// Reads a document without taking the reader latch.
    ///
    /// For callers that already hold the collection's writer latch (the
    /// index layer fetching a pre-image mid-commit); taking the reader
    /// latch there would self-deadlock.
    pub(crate) fn read_document_unlatched(
        &self,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Document>> {
        let image = self.load_or_empty(collection)?;
        Ok(image.documents.get(id).cloned())
    }

    /// Serializes `image` and swaps it over `path` atomically:
    /// write temp, fsync temp, rename, fsync directory. Any failure
    /// removes the temp file and leaves the previous file untouched.
    fn write_collection_atomic(&self, path: &Path, image: &mut CollectionFile) -> CoreResult<()> {
        let data = image.encode()?;
        atomic_write(path, &data, self.sync_writes)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("data_dir", &self.data_dir)
            .field("sync_writes", &self.sync_writes)
            .finish_non_exhaustive()
    }
}

/// Writes `data` to `path` via the temp-fsync-rename protocol used for
/// collection files. Shared with the index layer for persisted secondary
/// indexes.
pub(crate) fn atomic_write(path: &Path, data: &[u8], sync: bool) -> CoreResult<()> {
    let temp_path = path.with_extension("json.tmp");

    let result = (|| -> CoreResult<()> {
        let mut temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp.write_all(data)?;
        if sync {
            temp.sync_all()?;
        }
        drop(temp);

        fs::rename(&temp_path, path)?;
        if sync {
            sync_parent_dir(path)?;
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Validates that a collection name is usable as a file stem.
pub(crate) fn validate_collection_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_argument(
            "collection name must not be empty",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::invalid_argument(format!(
            "collection name {name:?} contains characters outside [A-Za-z0-9_-]"
        )));
    }
    if name.contains(INDEX_FILE_MARKER) {
        return Err(CoreError::invalid_argument(format!(
            "collection name {name:?} contains reserved marker {INDEX_FILE_MARKER:?}"
        )));
    }
    Ok(())
}

/// Reads a file, retrying once on an interrupted syscall.
fn read_retry(path: &Path) -> io::Result<Vec<u8>> {
    match fs::read(path) {
        Err(e) if e.kind() == io::ErrorKind::Interrupted => fs::read(path),
        other => other,
    }
}

/// Fsyncs the parent directory so a rename survives a crash.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    // NTFS journaling covers metadata durability for renames.
    Ok(())
}
