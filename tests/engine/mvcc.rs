//! MVCC Tests
//!
//! Snapshot isolation, fast-forward commits, replay merges and conflicts.

use crate::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tesseradb::storage::{MemoryStore, Storage};
use tesseradb::{DatabaseConfig, ObjectRef, Result, TransactionState};

/// Memory store that counts object reads and writes
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStore {
    fn reset(&self) {
        self.gets.store(0, Ordering::SeqCst);
        self.saves.store(0, Ordering::SeqCst);
    }
}

impl Storage for CountingStore {
    fn get_object(&self, id: ObjectRef) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_object(id)
    }

    fn save_object(&self, bytes: &[u8]) -> Result<ObjectRef> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_object(bytes)
    }

    fn get_named_state(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get_named_state(name)
    }

    fn set_named_state(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.inner.set_named_state(name, bytes)
    }
}

fn name(s: &str) -> Value {
    Value::object([("name", s)])
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[tokio::test]
async fn test_reads_see_own_writes_before_commit() {
    let db = create_db();
    let txn = db.begin();
    txn.set("users", k(1), "alice").await.unwrap();

    assert_eq!(txn.get("users", &k(1)).await.unwrap(), Some(Value::from("alice")));
    let other = db.begin();
    assert_eq!(
        other.get("users", &k(1)).await.unwrap(),
        None,
        "uncommitted writes must stay private"
    );
}

#[tokio::test]
async fn test_snapshot_is_stable_across_commits() {
    let db = create_db();
    seed(&db, "users", vec![(k(1), Value::from("v1"))]).await;

    let reader = db.begin();
    assert_eq!(reader.get("users", &k(1)).await.unwrap(), Some(Value::from("v1")));

    let writer = db.begin();
    writer.set("users", k(1), "v2").await.unwrap();
    writer.commit().await.unwrap();

    assert_eq!(
        reader.get("users", &k(1)).await.unwrap(),
        Some(Value::from("v1")),
        "reader keeps its snapshot"
    );
    assert_eq!(db.begin().get("users", &k(1)).await.unwrap(), Some(Value::from("v2")));
}

// =============================================================================
// FAST-FORWARD
// =============================================================================

#[tokio::test]
async fn test_fast_forward_leaves_untouched_domains_alone() {
    init_tracing();
    let store = Arc::new(CountingStore::default());
    let db = Database::with_storage(store.clone(), DatabaseConfig::default()).unwrap();

    let bulk: Vec<(Key, Value)> = (0..200).map(|i| (k(i), Value::from(i))).collect();
    seed(&db, "bulk", bulk).await;

    store.reset();
    let txn = db.begin();
    txn.set("small", k(1), "one").await.unwrap();
    txn.commit().await.unwrap();

    let gets = store.gets.load(Ordering::SeqCst);
    let saves = store.saves.load(Ordering::SeqCst);
    assert!(gets < 50, "fast-forward read {} objects", gets);
    assert!(saves < 50, "fast-forward wrote {} objects", saves);

    let reader = db.begin();
    assert_eq!(reader.find("bulk", Query::all()).await.unwrap().len(), 200);
    assert_eq!(reader.get("small", &k(1)).await.unwrap(), Some(Value::from("one")));
}

#[tokio::test]
async fn test_transaction_keeps_writing_after_commit() {
    let db = create_db();
    let txn = db.begin();
    let first_id = txn.id();

    txn.set("users", k(1), "a").await.unwrap();
    txn.commit().await.unwrap();
    assert_ne!(txn.id(), first_id, "rebase assigns a new id");
    assert_eq!(txn.state(), TransactionState::Open);

    txn.set("users", k(2), "b").await.unwrap();
    txn.commit().await.unwrap();

    let reader = db.begin();
    assert_eq!(keys(&reader, "users", Query::all()).await, vec![k(1), k(2)]);
}

// =============================================================================
// DISJOINT DOMAINS
// =============================================================================

#[tokio::test]
async fn test_disjoint_domains_both_commit() {
    let db = create_db();
    let a = db.begin();
    let b = db.begin();

    a.set("domain1", k(1), "from a").await.unwrap();
    b.set("domain2", k(1), "from b").await.unwrap();

    a.commit().await.unwrap();
    assert_eq!(
        b.get("domain1", &k(1)).await.unwrap(),
        None,
        "b does not see a's commit before its own"
    );
    b.commit().await.unwrap();

    // Both are rebased onto the master that contains both writes.
    assert_eq!(b.get("domain1", &k(1)).await.unwrap(), Some(Value::from("from a")));
    assert_eq!(b.get("domain2", &k(1)).await.unwrap(), Some(Value::from("from b")));
    let reader = db.begin();
    assert_eq!(reader.get("domain2", &k(1)).await.unwrap(), Some(Value::from("from b")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_distinct_keys() {
    let db = create_db();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            let txn = db.begin();
            txn.set("counters", k(i), i).await?;
            txn.commit().await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let reader = db.begin();
    assert_eq!(keys(&reader, "counters", Query::all()).await, (0..16).map(k).collect::<Vec<_>>());
    assert_eq!(reader.find("$history", Query::all()).await.unwrap().len(), 16);
}

// =============================================================================
// CONFLICTS
// =============================================================================

#[tokio::test]
async fn test_same_key_conflicts_reported_in_write_order() {
    let db = create_db();
    seed(
        &db,
        "domain1",
        vec![(k(1), Value::from(1)), (k(2), name("two")), (k(3), Value::from(3))],
    )
    .await;
    seed(&db, "domain2", vec![(k(5), Value::from(5))]).await;

    let a = db.begin();
    let b = db.begin();

    a.set("domain1", k(1), name("one")).await.unwrap();
    a.set("domain1", k(2), 22).await.unwrap();
    a.set("domain2", k(5), 55).await.unwrap();

    b.set("domain1", k(1), 111).await.unwrap();
    b.del("domain1", &k(2)).await.unwrap();
    b.set("domain2", k(5), 555).await.unwrap();

    a.commit().await.unwrap();
    let err = b.commit().await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {:?}", err);

    let conflicts = err.conflicts().unwrap();
    let summary: Vec<(&str, Key, Option<Value>, Option<Value>)> = conflicts
        .iter()
        .map(|c| (c.domain.as_str(), c.key.clone(), c.original.clone(), c.actual.clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("domain1", k(1), Some(Value::from(1)), Some(name("one"))),
            ("domain1", k(2), Some(name("two")), Some(Value::from(22))),
            ("domain2", k(5), Some(Value::from(5)), Some(Value::from(55))),
        ]
    );

    let reader = db.begin();
    assert_eq!(reader.get("domain1", &k(1)).await.unwrap(), Some(name("one")));
    assert_eq!(reader.get("domain1", &k(3)).await.unwrap(), Some(Value::from(3)));
}

#[tokio::test]
async fn test_insert_insert_race_conflicts() {
    let db = create_db();
    let a = db.begin();
    let b = db.begin();
    a.set("users", k(7), "a").await.unwrap();
    b.set("users", k(7), "b").await.unwrap();
    a.commit().await.unwrap();

    let err = b.commit().await.unwrap_err();
    let conflicts = err.conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].original, None, "b saw no value");
    assert_eq!(conflicts[0].actual, Some(Value::from("a")));
}

#[tokio::test]
async fn test_conflict_leaves_transaction_open_and_unchanged() {
    let db = create_db();
    let a = db.begin();
    let b = db.begin();
    a.set("users", k(1), "a").await.unwrap();
    b.set("users", k(1), "b").await.unwrap();
    a.commit().await.unwrap();

    assert!(b.commit().await.unwrap_err().is_conflict());
    assert_eq!(b.state(), TransactionState::Open);
    assert_eq!(
        b.get("users", &k(1)).await.unwrap(),
        Some(Value::from("b")),
        "private writes survive a conflict"
    );

    b.rollback().await.unwrap();
    assert_eq!(b.get("users", &k(1)).await.unwrap(), Some(Value::from("a")));
    b.set("users", k(1), "b").await.unwrap();
    b.commit().await.unwrap();
    assert_eq!(db.begin().get("users", &k(1)).await.unwrap(), Some(Value::from("b")));
}

#[tokio::test]
async fn test_clean_entries_merge_around_untouched_keys() {
    let db = create_db();
    seed(&db, "users", vec![(k(1), Value::from("one")), (k(2), Value::from("two"))]).await;

    let a = db.begin();
    let b = db.begin();
    a.set("users", k(1), "ONE").await.unwrap();
    b.set("users", k(2), "TWO").await.unwrap();
    b.del("users", &k(2)).await.unwrap();
    b.set("users", k(3), "three").await.unwrap();
    a.commit().await.unwrap();
    b.commit().await.unwrap();

    let reader = db.begin();
    let found = reader.find("users", Query::all()).await.unwrap();
    assert_eq!(
        found,
        vec![(k(1), Value::from("ONE")), (k(3), Value::from("three"))]
    );
}

// =============================================================================
// VALIDATION
// =============================================================================

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_effect() {
    let db = create_db();
    let txn = db.begin();

    assert!(txn.set("$history", k(1), 1).await.unwrap_err().is_validation());
    assert!(txn.set("$private", k(1), 1).await.unwrap_err().is_validation());
    assert!(txn.set("", k(1), 1).await.unwrap_err().is_validation());
    assert!(txn
        .set("users", Key::from("bad\0key"), 1)
        .await
        .unwrap_err()
        .is_validation());

    assert_eq!(txn.state(), TransactionState::Open);
    txn.commit().await.unwrap();
    assert_eq!(db.master_ref(), None, "nothing was written");
}

#[tokio::test]
async fn test_delete_of_absent_key_records_nothing() {
    let db = create_db();
    let txn = db.begin();
    txn.del("users", &k(1)).await.unwrap();
    assert!(txn.find("$history", Query::all()).await.unwrap().is_empty());
}
