//! Advisory file lock registry.
//!
//! One `<collection>.lock` sidecar per collection coordinates writers
//! *across processes*. Within a process the per-collection writer latch
//! already excludes concurrent mutators, so the registry is keyed on
//! collection name and each lock file is opened at most once per engine.
//!
//! The registry is engine-wide shared state: it is created when the
//! storage engine is constructed and torn down in `close()`.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// Registry of open advisory lock files, keyed by collection name.
#[derive(Debug)]
pub struct LockRegistry {
    /// Directory holding the `.lock` sidecars.
    dir: PathBuf,
    /// Open lock file handles. Guarded so concurrent first-touches of the
    /// same collection cannot race to open two handles.
    files: Mutex<HashMap<String, Arc<File>>>,
}

impl LockRegistry {
    /// Creates a registry rooted at the given data directory.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the exclusive advisory lock for a collection, blocking
    /// until it is available.
    ///
    /// The returned guard releases the lock on drop. The caller must hold
    /// the collection's writer latch before calling; that latch is what
    /// prevents re-entrant acquisition within this process.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` if the lock file cannot be opened or the
    /// lock cannot be obtained.
    pub fn acquire(&self, collection: &str) -> CoreResult<LockGuard> {
        let file = self.lock_file(collection)?;

        file.lock_exclusive()
            .map_err(|e| CoreError::lock_failure(collection, e.to_string()))?;

        Ok(LockGuard { file })
    }

    /// Returns the open handle for a collection's lock file, opening and
    /// registering it on first touch.
    fn lock_file(&self, collection: &str) -> CoreResult<Arc<File>> {
        let mut files = self.files.lock();

        if let Some(file) = files.get(collection) {
            return Ok(Arc::clone(file));
        }

        let path = self.dir.join(format!("{collection}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CoreError::lock_failure(collection, e.to_string()))?;

        let file = Arc::new(file);
        files.insert(collection.to_string(), Arc::clone(&file));
        Ok(file)
    }

    /// Releases every open lock file handle.
    ///
    /// Any outstanding guard keeps its handle alive until dropped; new
    /// acquisitions after `close` reopen the sidecar.
    pub fn close(&self) {
        self.files.lock().clear();
    }
}

/// Guard holding the exclusive advisory lock for one collection.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: Arc<File>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlock failure leaves the flock held until the handle closes;
        // nothing actionable for the caller at this point.
        let _ = FileExt::unlock(&*self.file);
    }
}
