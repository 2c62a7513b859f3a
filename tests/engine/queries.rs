//! Query and Cursor Tests

use crate::*;
use serde_json::json;

async fn numbered(db: &Database, n: i64) {
    seed(db, "items", (1..=n).map(|i| (k(i), Value::from(i))).collect()).await;
}

// =============================================================================
// RANGES
// =============================================================================

#[tokio::test]
async fn test_range_bounds() {
    let db = create_db();
    numbered(&db, 10).await;
    let txn = db.begin();

    assert_eq!(
        keys(&txn, "items", Query::all().gte(3).lt(6)).await,
        vec![k(3), k(4), k(5)]
    );
    assert_eq!(
        keys(&txn, "items", Query::all().gt(3).lte(6)).await,
        vec![k(4), k(5), k(6)]
    );
    assert_eq!(keys(&txn, "items", Query::all().eq(7)).await, vec![k(7)]);
    assert!(keys(&txn, "items", Query::all().eq(70)).await.is_empty());
    assert!(keys(&txn, "items", Query::all().gt(5).lt(5)).await.is_empty());
}

#[tokio::test]
async fn test_reverse_skip_and_limit() {
    let db = create_db();
    numbered(&db, 10).await;
    let txn = db.begin();

    assert_eq!(
        keys(&txn, "items", Query::all().rev().skip(2).limit(3)).await,
        vec![k(8), k(7), k(6)]
    );
    assert_eq!(
        keys(&txn, "items", Query::all().lte(4).rev()).await,
        vec![k(4), k(3), k(2), k(1)]
    );
    assert!(keys(&txn, "items", Query::all().skip(20)).await.is_empty());
    assert!(keys(&txn, "items", Query::all().limit(0)).await.is_empty());
}

#[tokio::test]
async fn test_mixed_key_types_sort_by_type_then_value() {
    let db = create_db();
    seed(
        &db,
        "mixed",
        vec![
            (Key::from(vec![Key::from(1)]), Value::Null),
            (Key::from("b"), Value::Null),
            (k(-5), Value::Null),
            (Key::Null, Value::Null),
            (Key::from(true), Value::Null),
            (Key::from("a"), Value::Null),
            (Key::from(false), Value::Null),
        ],
    )
    .await;

    let txn = db.begin();
    assert_eq!(
        keys(&txn, "mixed", Query::all()).await,
        vec![
            Key::Null,
            Key::from(false),
            Key::from(true),
            k(-5),
            Key::from("a"),
            Key::from("b"),
            Key::from(vec![Key::from(1)]),
        ]
    );
}

// =============================================================================
// PREFIX
// =============================================================================

async fn prefix_fixture() -> Database {
    let db = create_db();
    let arr = |parts: Vec<Key>| Key::from(parts);
    seed(
        &db,
        "words",
        vec![
            (Key::from("abc"), Value::Null),
            (Key::from("abcd"), Value::Null),
            (Key::from("abcde"), Value::Null),
            (Key::from("abd"), Value::Null),
            (Key::from("ab"), Value::Null),
            (arr(vec![Key::from("abc"), k(1)]), Value::Null),
            (arr(vec![Key::from("abc"), Key::from("def"), k(2)]), Value::Null),
            (arr(vec![Key::from("abcdef"), k(3)]), Value::Null),
        ],
    )
    .await;
    db
}

#[tokio::test]
async fn test_like_string_prefix() {
    let db = prefix_fixture().await;
    let txn = db.begin();

    let expected = vec![Key::from("abc"), Key::from("abcd"), Key::from("abcde")];
    assert_eq!(keys(&txn, "words", Query::all().like("abc")).await, expected);

    let mut reversed = expected.clone();
    reversed.reverse();
    assert_eq!(keys(&txn, "words", Query::all().like("abc").rev()).await, reversed);
}

#[tokio::test]
async fn test_like_array_prefix() {
    let db = prefix_fixture().await;
    let txn = db.begin();

    assert_eq!(
        keys(&txn, "words", Query::all().like(Key::from(Vec::<Key>::new()))).await,
        vec![
            Key::from(vec![Key::from("abc"), k(1)]),
            Key::from(vec![Key::from("abc"), Key::from("def"), k(2)]),
            Key::from(vec![Key::from("abcdef"), k(3)]),
        ]
    );
    assert_eq!(
        keys(&txn, "words", Query::all().like(vec![Key::from("abc")])).await,
        vec![
            Key::from(vec![Key::from("abc"), k(1)]),
            Key::from(vec![Key::from("abc"), Key::from("def"), k(2)]),
        ],
        "element prefixes match whole elements only"
    );
}

// =============================================================================
// FILTER DOCUMENTS
// =============================================================================

#[tokio::test]
async fn test_filter_document_matches_builder() {
    let db = create_db();
    numbered(&db, 10).await;
    let txn = db.begin();

    let query = Query::try_from(json!({"$gte": 2, "$lt": 9, "$rev": true, "$skip": 1, "$limit": 2})).unwrap();
    assert_eq!(query, Query::all().gte(2).lt(9).rev().skip(1).limit(2));
    assert_eq!(keys(&txn, "items", query).await, vec![k(7), k(6)]);
}

#[test]
fn test_malformed_filters_are_validation_errors() {
    let bad = [
        json!({"$between": [1, 2]}),
        json!({"$limit": -1}),
        json!({"$limit": 1.5}),
        json!({"$rev": "yes"}),
        json!({"$gt": {"nested": true}}),
        json!([1, 2]),
    ];
    for filter in bad {
        let err = Query::try_from(filter.clone()).unwrap_err();
        assert!(err.is_validation(), "{} should be rejected, got {:?}", filter, err);
    }
}

#[tokio::test]
async fn test_eq_with_range_rejected_at_cursor_creation() {
    let db = create_db();
    let txn = db.begin();
    let err = txn.cursor("items", Query::all().eq(1).gt(0)).unwrap_err();
    assert!(err.is_validation());
    let err = txn.cursor("items", Query::all().like(5)).unwrap_err();
    assert!(err.is_validation(), "numbers are not prefixes");
}

// =============================================================================
// CURSORS
// =============================================================================

#[tokio::test]
async fn test_cursor_sees_writes_made_between_steps() {
    let db = create_db();
    numbered(&db, 5).await;
    let txn = db.begin();

    let mut cursor = txn.cursor("items", Query::all()).unwrap();
    assert_eq!(cursor.next().await.unwrap().map(|(key, _)| key), Some(k(1)));

    txn.del("items", &k(3)).await.unwrap();
    txn.set("items", k(6), 6).await.unwrap();
    txn.set("items", k(0), 0).await.unwrap();

    let mut rest = Vec::new();
    while let Some((key, _)) = cursor.next().await.unwrap() {
        rest.push(key);
    }
    assert_eq!(
        rest,
        vec![k(2), k(4), k(5), k(6)],
        "resumes after the last key; keys behind the cursor are not revisited"
    );
    assert!(cursor.is_done());
    assert_eq!(cursor.returned(), 5);
    assert_eq!(cursor.next().await.unwrap(), None, "finished cursors stay finished");
}

#[tokio::test]
async fn test_cursor_honors_limit_and_skip() {
    let db = create_db();
    numbered(&db, 10).await;
    let txn = db.begin();

    let mut cursor = txn.cursor("items", Query::all().skip(3).limit(2)).unwrap();
    assert_eq!(cursor.next().await.unwrap().map(|(key, _)| key), Some(k(4)));
    assert_eq!(cursor.next().await.unwrap().map(|(key, _)| key), Some(k(5)));
    assert_eq!(cursor.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_out_of_line_values_are_resolved() {
    let db = Database::builder().inline_string_limit(4).open().unwrap();
    let long = "a string well past the inline limit";
    seed(
        &db,
        "docs",
        vec![
            (k(1), Value::from(long)),
            (k(2), Value::from(json!({"tags": ["x", "y"]}))),
        ],
    )
    .await;

    let txn = db.begin();
    let found = txn.find("docs", Query::all()).await.unwrap();
    assert_eq!(found[0].1, Value::from(long));
    assert_eq!(found[1].1, Value::from(json!({"tags": ["x", "y"]})));
}
