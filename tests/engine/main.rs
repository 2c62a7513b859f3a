//! Engine Integration Test Suite
//!
//! End-to-end tests through the public `Database` / `Transaction` API.
//!
//! ## Modules
//!
//! - `mvcc`: fast-forward, disjoint domains, conflicts, rebase
//! - `history`: the `$history` domain
//! - `queries`: range, prefix and paging queries, cursors
//! - `durability`: file-backed stores across reopen
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test engine
//! cargo test --test engine mvcc::
//! ```

use tesseradb::{Database, Key, Query, Transaction, Value};

pub mod durability;
pub mod history;
pub mod mvcc;
pub mod queries;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Create an in-memory test database
pub fn create_db() -> Database {
    init_tracing();
    Database::ephemeral().expect("Failed to create in-memory database")
}

/// Numeric key shorthand
pub fn k(n: i64) -> Key {
    Key::from(n)
}

/// Write `pairs` into `domain` and commit
pub async fn seed(db: &Database, domain: &str, pairs: Vec<(Key, Value)>) {
    let txn = db.begin();
    for (key, value) in pairs {
        txn.set(domain, key, value).await.expect("seed write");
    }
    txn.commit().await.expect("seed commit");
}

/// Keys returned by a query
pub async fn keys(txn: &Transaction, domain: &str, query: Query) -> Vec<Key> {
    txn.find(domain, query)
        .await
        .expect("find")
        .into_iter()
        .map(|(key, _)| key)
        .collect()
}
