//! In-memory indexes with persistence and rebuild.
//!
//! Two index shapes per collection:
//!
//! - **Primary**: id → document, exactly one entry per live document,
//!   mutated synchronously with storage writes within a commit.
//! - **Secondary**: field → value → set of ids, equality lookups only.
//!
//! ## Invariants
//!
//! - Primary index and storage agree after every commit.
//! - Every secondary posting references an id whose stored document
//!   actually carries the posted (field, value) pair.
//! - For a fixed storage state, rebuilding produces the same posting sets
//!   as the incremental maintenance path.

mod manager;
mod primary;
mod secondary;

pub use manager::IndexManager;
pub use primary::PrimaryIndex;
pub use secondary::{SecondaryIndex, SecondaryIndexFile};
