//! Buffered transactions with atomic, durable commits.
//!
//! A transaction buffers its operations in memory and touches nothing
//! until commit. Isolation is read-committed plus read-your-writes:
//! single-writer-per-collection serialization during commit, buffered
//! reads inside the owning transaction, and no snapshots. A long-running
//! transaction's fallback reads see the latest committed state each time.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
