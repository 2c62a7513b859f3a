//! # Tessera
//!
//! Embedded transactional document store with optimistic MVCC.
//!
//! Documents live in named domains, each an ordered index over typed keys.
//! A transaction works on a private copy-on-write view; at commit its
//! writes are either fast-forwarded or replayed on top of whatever was
//! committed in the meantime, and overlapping writes to the same key are
//! reported as conflicts.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tesseradb::prelude::*;
//!
//! let db = Database::builder().path("./my-db").open()?;
//!
//! let txn = db.begin();
//! txn.set("users", Key::from(1), Value::from("alice")).await?;
//! txn.commit().await?;
//!
//! let users = txn.find("users", Query::all().limit(10)).await?;
//! let recent = txn.find("$history", Query::all().rev().limit(5)).await?;
//! ```
//!
//! ## Layers
//!
//! - [`codec`]: order-preserving key encoding
//! - [`storage`]: object store backends ([`MemoryStore`](storage::MemoryStore),
//!   [`FileStore`](storage::FileStore))
//! - [`queue`]: the serial job queue every mutation runs on
//! - [`index`]: the persistent AVL tree behind each domain
//! - [`Database`] / [`Transaction`]: the engine

#![warn(missing_docs)]

pub mod prelude;

pub use tessera_core::codec;
pub use tessera_engine::{
    validate_domain_name, Conflict, Cursor, Database, DatabaseBuilder, DatabaseConfig,
    DurabilityMode, Error, HistoryKind, Key, ObjectRef, Query, Result, Transaction,
    TransactionState, Value, DEFAULT_INLINE_STRING_LIMIT, HISTORY_DOMAIN,
};

/// Storage backends and the storage trait
pub mod storage {
    pub use tessera_storage::{FileStore, MemoryStore, Storage, StorageExt};
}

/// Serial job queue
pub mod queue {
    pub use tessera_concurrency::SerialQueue;
}

/// Persistent index tree
pub mod index {
    pub use tessera_index::{Direction, PersistentTree, Scan};
}
