//! Storage collaborators for the fieldsync queue.
//!
//! This module provides the boundaries the sync queue talks to:
//! - A durable key-value record store (in-memory and SQLite backends)
//! - A remote store capable of idempotent upserts (in-memory and HTTP backends)
//! - The storage guard that turns free disk space into admission decisions
//!
//! # Design Principles
//! - Backend isolation: the queue only sees the `RecordStore` and `RemoteStore` traits
//! - Async operations: every collaborator call is async
//! - Remote failures are always transient from the caller's point of view

pub mod guard;
pub mod http;
pub mod memory;
pub mod remote;
pub mod sqlite;
pub mod store;

pub use guard::{
    DiskFreeSpace, FixedFreeSpace, FreeSpaceProbe, StorageCheck, StorageGuard, StorageThresholds,
    StorageWarning, MIB,
};
pub use http::HttpRemote;
pub use memory::MemoryStore;
pub use remote::{Ack, MemoryRemote, RemoteError, RemoteStore};
pub use sqlite::SqliteStore;
pub use store::RecordStore;
