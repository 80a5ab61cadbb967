//! Transactional, permissioned, version-checked object storage.
//!
//! Objects live in a three-dimensional key space `(collection, key, owner)`
//! backed by a relational table. Every write regenerates the object's
//! version (an MD5 digest of its value) and can be made conditional on the
//! previous version; reads, writes, and deletes are gated by per-object
//! ACLs unless the caller is authoritative.
//!
//! # Module Organization
//!
//! - [`schema`]: DDL and database initialization
//! - [`acl`]: caller identity -> SQL predicate translation
//! - [`cursor`]: opaque pagination token codec
//! - [`retry`]: bounded retry of transient backend faults
//! - [`engine`]: the transactional read/write/delete/list core
//!
//! # Concurrency
//!
//! The engine holds no in-process mutable state; safety derives entirely
//! from the backend transaction. Batched writes and deletes are sorted by
//! `(collection, key, owner)` before execution so contending batches lock
//! rows in the same order.

pub mod acl;
pub mod cursor;
pub mod engine;
pub mod retry;
pub mod schema;

mod error;
mod types;

pub use cursor::StorageCursor;
pub use error::{Result, StorageError};
pub use types::{ReadId, StorageAck, StorageDelete, StorageObject, StorageObjectList, StorageWrite};
