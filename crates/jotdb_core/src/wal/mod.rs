//! Write-Ahead Log for durability and crash recovery.
//!
//! Every committed operation is appended here and fsynced before the
//! commit is acknowledged; the fsync of a transaction's last record is
//! the commit boundary. On startup the log is replayed into storage and
//! indexes, then truncated.
//!
//! ## Recovery policy
//!
//! A truncated final line means the process died mid-append before the
//! fsync completed; the partial record was never acknowledged, so it is
//! discarded and recovery proceeds. Corruption anywhere before the tail
//! means the acknowledged history is damaged, and the database refuses to
//! open rather than silently lose data.
//!
//! ## Invariants
//!
//! - Records are never modified after being written.
//! - Sequence numbers strictly increase, across restarts and checkpoints.
//! - Replay is idempotent: re-applying a record whose effect is already
//!   present leaves state unchanged.
//! - When storage and the log disagree, the log wins.

mod record;
mod writer;

pub use record::WalRecord;
pub use writer::WalManager;
