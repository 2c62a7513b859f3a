//! Index layer for TesseraDB
//!
//! This crate implements the per-domain index:
//! - [`PersistentTree`]: copy-on-write AVL tree over encoded keys
//! - lazy loading of committed nodes through the storage collaborator
//! - explicit, retryable commit of pending nodes
//!
//! The same tree type backs user domains, the master index and the history
//! log.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod node;
pub mod tree;

pub use tree::{Direction, PersistentTree, Scan};
