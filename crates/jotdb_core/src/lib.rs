//! # JotDB Core
//!
//! Core engine for JotDB: a durable, concurrent, transactional JSON
//! document store on local disk.
//!
//! This crate provides:
//! - Storage engine with atomic per-collection file persistence
//! - Primary and secondary in-memory indexes with persistence and rebuild
//! - Buffered multi-operation transactions with deadlock-free commits
//! - Write-ahead log with replay-on-start durability
//!
//! The HTTP front end, authentication, and the query pipeline live in
//! other crates; this crate exposes the storage, index, and transaction
//! surfaces they consume.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod document;
mod error;
mod index;
mod storage;
mod transaction;
mod types;
mod wal;

pub use config::Config;
pub use database::Database;
pub use document::{canonical_key, field_value};
pub use error::{CoreError, CoreResult};
pub use index::{IndexManager, PrimaryIndex, SecondaryIndex, SecondaryIndexFile};
pub use storage::{CollectionFile, CollectionMetadata, LockGuard, LockRegistry, StorageEngine};
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use types::{Document, DocumentId, OpType, Operation, SequenceNumber, TransactionId};
pub use wal::{WalManager, WalRecord};
