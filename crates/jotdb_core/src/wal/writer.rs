//! WAL manager: ordered, fsynced appends and startup reads.

use crate::error::{CoreError, CoreResult};
use crate::types::{Operation, SequenceNumber};
use crate::wal::record::WalRecord;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::warn;

/// File name of the log within the WAL directory.
const WAL_FILE: &str = "wal.log";

/// State guarded by the log mutex: the open log file and the sequence
/// counter. Advancing the counter and appending the record happen under
/// one lock hold, which is what makes sequences strictly monotonic.
#[derive(Debug)]
struct WalInner {
    file: File,
    next_seq: u64,
}

/// Append-only, newline-delimited JSON log of committed operations.
///
/// All appends for one transaction happen under a single mutex hold with
/// a single fsync at the end, so the commit boundary is the fsync of the
/// transaction's last record.
pub struct WalManager {
    path: PathBuf,
    sync_writes: bool,
    inner: Mutex<WalInner>,
}

impl WalManager {
    /// Opens (or creates) the log under `wal_dir` and scans it to seed
    /// the sequence counter: 1 + the maximum sequence present, or 1 for
    /// an empty log.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or file cannot be opened, and
    /// `ReplayFailed` if an interior record is corrupt.
    pub fn open(wal_dir: impl Into<PathBuf>, sync_writes: bool) -> CoreResult<Self> {
        let wal_dir = wal_dir.into();
        fs::create_dir_all(&wal_dir)?;
        let path = wal_dir.join(WAL_FILE);

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let manager = Self {
            path,
            sync_writes,
            inner: Mutex::new(WalInner { file, next_seq: 1 }),
        };

        let max_seq = manager
            .read_records()?
            .last()
            .map_or(0, |record| record.seq.as_u64());
        manager.inner.lock().next_seq = max_seq + 1;

        Ok(manager)
    }

    /// Appends one record per operation, assigning consecutive sequence
    /// numbers, then flushes (and fsyncs when `sync_writes` is on).
    ///
    /// Returns the sequence of the last record, or `None` when `ops` is
    /// empty (no I/O happens).
    ///
    /// # Errors
    ///
    /// On error nothing is considered durable; the caller aborts the
    /// commit.
    pub fn append_transaction(&self, ops: &[Operation]) -> CoreResult<Option<SequenceNumber>> {
        if ops.is_empty() {
            return Ok(None);
        }

        let mut inner = self.inner.lock();
        let ts = Utc::now();

        let mut buffer = String::new();
        let mut last_seq = SequenceNumber::new(0);
        for op in ops {
            last_seq = SequenceNumber::new(inner.next_seq);
            inner.next_seq += 1;

            let record = WalRecord::from_operation(last_seq, ts, op);
            buffer.push_str(&record.encode_line()?);
            buffer.push('\n');
        }

        inner.file.write_all(buffer.as_bytes())?;
        inner.file.flush()?;
        if self.sync_writes {
            inner.file.sync_all()?;
        }

        Ok(Some(last_seq))
    }

    /// Reads every record currently in the log, in order.
    ///
    /// A truncated or unparsable *final* line is tolerated as a crash
    /// mid-append before the fsync completed: it is discarded with a
    /// warning and the earlier records stand. Corruption anywhere else,
    /// or a sequence that fails to increase, is fatal.
    ///
    /// # Errors
    ///
    /// Returns `ReplayFailed` for interior corruption or non-monotonic
    /// sequences.
    pub fn read_records(&self) -> CoreResult<Vec<WalRecord>> {
        let mut inner = self.inner.lock();

        let mut data = String::new();
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.read_to_string(&mut data)?;

        let lines: Vec<&str> = data.lines().collect();
        let mut records = Vec::with_capacity(lines.len());
        let mut last_seq = 0u64;

        for (index, line) in lines.iter().enumerate() {
            match WalRecord::decode_line(line) {
                Ok(record) => {
                    if record.seq.as_u64() <= last_seq {
                        return Err(CoreError::replay_failed(format!(
                            "sequence {} at line {} does not increase past {}",
                            record.seq,
                            index + 1,
                            last_seq
                        )));
                    }
                    last_seq = record.seq.as_u64();
                    records.push(record);
                }
                Err(e) if index == lines.len() - 1 => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "discarding truncated WAL tail"
                    );
                    break;
                }
                Err(e) => {
                    return Err(CoreError::replay_failed(format!(
                        "corrupt record at line {}: {e}",
                        index + 1
                    )));
                }
            }
        }

        Ok(records)
    }

    /// Truncates the log to empty and fsyncs. The sequence counter is
    /// left untouched, so sequences stay monotonic across checkpoints.
    pub fn reset(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.file.metadata()?.len())
    }

    /// The sequence the next record will receive.
    #[must_use]
    pub fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.inner.lock().next_seq)
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("path", &self.path)
            .field("sync_writes", &self.sync_writes)
            .field("next_seq", &self.next_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, DocumentId};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn insert_op(id: &str) -> Operation {
        Operation::insert(
            "users",
            DocumentId::new(id).unwrap(),
            doc(json!({"id": id})),
        )
    }

    #[test]
    fn empty_log_starts_at_one() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), true).unwrap();
        assert_eq!(wal.next_sequence().as_u64(), 1);
        assert!(wal.read_records().unwrap().is_empty());
    }

    #[test]
    fn append_assigns_consecutive_sequences() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), true).unwrap();

        let last = wal
            .append_transaction(&[insert_op("u1"), insert_op("u2"), insert_op("u3")])
            .unwrap()
            .unwrap();
        assert_eq!(last.as_u64(), 3);

        let records = wal.read_records().unwrap();
        assert_eq!(records.len(), 3);
        let seqs: Vec<u64> = records.iter().map(|r| r.seq.as_u64()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn empty_transaction_writes_nothing() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), true).unwrap();

        assert!(wal.append_transaction(&[]).unwrap().is_none());
        assert_eq!(wal.size().unwrap(), 0);
    }

    #[test]
    fn sequences_resume_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let wal = WalManager::open(dir.path(), true).unwrap();
            wal.append_transaction(&[insert_op("u1"), insert_op("u2")])
                .unwrap();
        }

        let wal = WalManager::open(dir.path(), true).unwrap();
        assert_eq!(wal.next_sequence().as_u64(), 3);

        let last = wal.append_transaction(&[insert_op("u3")]).unwrap().unwrap();
        assert_eq!(last.as_u64(), 3);
    }

    #[test]
    fn reset_empties_log_but_keeps_counter() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), true).unwrap();
        wal.append_transaction(&[insert_op("u1")]).unwrap();
        assert!(wal.size().unwrap() > 0);

        wal.reset().unwrap();
        assert_eq!(wal.size().unwrap(), 0);
        assert!(wal.read_records().unwrap().is_empty());
        assert_eq!(wal.next_sequence().as_u64(), 2);
    }

    #[test]
    fn truncated_tail_is_tolerated() {
        let dir = tempdir().unwrap();
        {
            let wal = WalManager::open(dir.path(), true).unwrap();
            wal.append_transaction(&[insert_op("u1"), insert_op("u2")])
                .unwrap();
        }

        // Simulate a crash mid-append: chop the last line in half.
        let path = dir.path().join(WAL_FILE);
        let data = fs::read_to_string(&path).unwrap();
        let cut = data.len() - 20;
        fs::write(&path, &data[..cut]).unwrap();

        let wal = WalManager::open(dir.path(), true).unwrap();
        let records = wal.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "u1");
        assert_eq!(wal.next_sequence().as_u64(), 2);
    }

    #[test]
    fn interior_corruption_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let wal = WalManager::open(dir.path(), true).unwrap();
            wal.append_transaction(&[insert_op("u1"), insert_op("u2")])
                .unwrap();
        }

        let path = dir.path().join(WAL_FILE);
        let data = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = data.lines().map(String::from).collect();
        lines[0] = "{mangled".to_string();
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let result = WalManager::open(dir.path(), true);
        assert!(matches!(result, Err(CoreError::ReplayFailed { .. })));
    }

    #[test]
    fn non_monotonic_sequence_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let wal = WalManager::open(dir.path(), true).unwrap();
            wal.append_transaction(&[insert_op("u1")]).unwrap();
        }

        // Duplicate the only line: second copy repeats seq 1.
        let path = dir.path().join(WAL_FILE);
        let data = fs::read_to_string(&path).unwrap();
        let mut doubled = data.clone();
        doubled.push_str(&data);
        doubled.push('\n');
        fs::write(&path, doubled).unwrap();

        let result = WalManager::open(dir.path(), true);
        assert!(matches!(result, Err(CoreError::ReplayFailed { .. })));
    }

    #[test]
    fn records_preserve_operation_payload() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), true).unwrap();

        let op = Operation::update(
            "posts",
            DocumentId::new("p1").unwrap(),
            doc(json!({"title": "hello", "tags": ["a", "b"]})),
        );
        wal.append_transaction(std::slice::from_ref(&op)).unwrap();

        let records = wal.read_records().unwrap();
        assert_eq!(records[0].to_operation(), op);
    }
}
