//! History Tests
//!
//! The read-only `$history` domain: one entry per write, in commit order.

use crate::*;
use tesseradb::HISTORY_DOMAIN;

fn field<'a>(entry: &'a Value, name: &str) -> &'a Value {
    entry.get(name).unwrap_or(&Value::Null)
}

#[tokio::test]
async fn test_history_has_one_insert_per_write() {
    let db = create_db();
    let txn = db.begin();
    for i in 1..=5 {
        txn.set("domain1", k(i), i * 10).await.unwrap();
    }
    for i in 1..=2 {
        txn.set("domain2", k(i), i * 100).await.unwrap();
    }
    txn.commit().await.unwrap();

    let reader = db.begin();
    let entries = reader.find(HISTORY_DOMAIN, Query::all()).await.unwrap();
    assert_eq!(entries.len(), 7, "one entry per write");

    let expected: Vec<(&str, Key)> = (1..=5)
        .map(|i| ("domain1", k(i)))
        .chain((1..=2).map(|i| ("domain2", k(i))))
        .collect();
    for ((_, entry), (domain, key)) in entries.iter().zip(&expected) {
        assert_eq!(field(entry, "kind"), &Value::from("insert"));
        assert_eq!(field(entry, "domain"), &Value::from(*domain));
        assert_eq!(field(entry, "key"), &Value::from(key));
        assert!(field(entry, "old").is_null(), "inserts have no old value");
    }

    let seqs: Vec<f64> = entries
        .iter()
        .map(|(key, _)| match key {
            Key::Number(n) => *n,
            other => panic!("history key {:?} is not a sequence number", other),
        })
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "sequence numbers increase");
}

#[tokio::test]
async fn test_history_records_old_and_new_values() {
    let db = create_db();
    seed(&db, "users", vec![(k(1), Value::from("first"))]).await;

    let txn = db.begin();
    txn.set("users", k(1), "second").await.unwrap();
    txn.del("users", &k(1)).await.unwrap();
    txn.commit().await.unwrap();

    let entries = db
        .begin()
        .find(HISTORY_DOMAIN, Query::all())
        .await
        .unwrap();
    let kinds: Vec<&Value> = entries.iter().map(|(_, e)| field(e, "kind")).collect();
    assert_eq!(
        kinds,
        vec![&Value::from("insert"), &Value::from("update"), &Value::from("delete")]
    );

    let (_, update) = &entries[1];
    assert_eq!(field(update, "old"), &Value::from("first"));
    assert_eq!(field(update, "new"), &Value::from("second"));
    let (_, delete) = &entries[2];
    assert_eq!(field(delete, "old"), &Value::from("second"));
    assert!(field(delete, "new").is_null());
}

#[tokio::test]
async fn test_history_follows_commit_order() {
    let db = create_db();
    let early = db.begin();
    let late = db.begin();

    // `early` writes first but commits last.
    early.set("events", k(1), "early").await.unwrap();
    late.set("events", k(2), "late").await.unwrap();
    late.commit().await.unwrap();
    early.commit().await.unwrap();

    let entries = db
        .begin()
        .find(HISTORY_DOMAIN, Query::all())
        .await
        .unwrap();
    let keys: Vec<&Value> = entries.iter().map(|(_, e)| field(e, "key")).collect();
    assert_eq!(keys, vec![&Value::from(&k(2)), &Value::from(&k(1))]);
}

#[tokio::test]
async fn test_history_includes_uncommitted_writes_of_own_transaction() {
    let db = create_db();
    seed(&db, "users", vec![(k(1), Value::from("a"))]).await;

    let txn = db.begin();
    txn.set("users", k(2), "b").await.unwrap();
    let entries = txn.find(HISTORY_DOMAIN, Query::all().rev().limit(1)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(field(&entries[0].1, "key"), &Value::from(&k(2)));

    let other = db.begin();
    assert_eq!(other.find(HISTORY_DOMAIN, Query::all()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_get_by_sequence() {
    let db = create_db();
    seed(&db, "users", vec![(k(1), Value::from("a"))]).await;

    let txn = db.begin();
    let (seq, entry) = txn
        .find(HISTORY_DOMAIN, Query::all())
        .await
        .unwrap()
        .remove(0);
    assert_eq!(txn.get(HISTORY_DOMAIN, &seq).await.unwrap(), Some(entry));
    assert_eq!(txn.get(HISTORY_DOMAIN, &k(999_999)).await.unwrap(), None);
}
