//! Convenient imports for Tessera.
//!
//! ```ignore
//! use tesseradb::prelude::*;
//!
//! let db = Database::ephemeral()?;
//! let txn = db.begin();
//! txn.set("users", Key::from(1), Value::from("alice")).await?;
//! ```

// Main entry points
pub use crate::{Database, DatabaseBuilder, DatabaseConfig, Transaction};

// Error handling
pub use crate::{Conflict, Error, Result};

// Keys, values and queries
pub use crate::{Cursor, Key, Query, Value, HISTORY_DOMAIN};

// Re-export serde_json for building documents
pub use serde_json::json;
