//! Transaction engine for Tessera
//!
//! This crate ties the lower layers together:
//! - [`Database`]: storage, master ref, and the master queue
//! - [`Transaction`]: private copy-on-write views with history
//! - Commit: fast-forward or history replay with conflict detection
//! - [`Query`] / [`Cursor`]: range, prefix and paging over a domain
//! - [`DatabaseConfig`] / [`DatabaseBuilder`]: configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cursor;
pub mod database;
mod domain;
pub mod history;
mod master;
mod merge;
pub mod query;
mod sequence;
pub mod transaction;

pub use config::{DatabaseBuilder, DatabaseConfig, DEFAULT_INLINE_STRING_LIMIT};
pub use cursor::Cursor;
pub use database::Database;
pub use domain::validate_domain_name;
pub use history::{HistoryKind, HISTORY_DOMAIN};
pub use query::Query;
pub use transaction::{Transaction, TransactionState};

// Re-export the types every caller needs
pub use tessera_core::{Conflict, Error, Key, ObjectRef, Result, Value};
pub use tessera_storage::DurabilityMode;
