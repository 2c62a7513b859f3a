//! Durability Tests
//!
//! File-backed databases across close and reopen.

use crate::*;
use std::fs;
use std::io::Write;
use tempfile::TempDir;
use tesseradb::{DatabaseConfig, DurabilityMode, HISTORY_DOMAIN};

fn open(dir: &TempDir) -> Database {
    init_tracing();
    Database::builder()
        .path(dir.path())
        .strict()
        .open()
        .expect("open file-backed database")
}

#[tokio::test]
async fn test_committed_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        assert!(!db.is_ephemeral());
        seed(
            &db,
            "users",
            vec![
                (k(1), Value::from("alice")),
                (k(2), Value::from(serde_json::json!({"name": "bob", "age": 41}))),
            ],
        )
        .await;
    }

    let db = open(&dir);
    let txn = db.begin();
    assert_eq!(txn.get("users", &k(1)).await.unwrap(), Some(Value::from("alice")));
    assert_eq!(
        txn.get("users", &k(2)).await.unwrap(),
        Some(Value::from(serde_json::json!({"name": "bob", "age": 41})))
    );
}

#[tokio::test]
async fn test_uncommitted_writes_are_lost_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        seed(&db, "users", vec![(k(1), Value::from("kept"))]).await;
        let txn = db.begin();
        txn.set("users", k(2), "dropped").await.unwrap();
    }

    let db = open(&dir);
    assert_eq!(keys(&db.begin(), "users", Query::all()).await, vec![k(1)]);
}

#[tokio::test]
async fn test_sequences_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        seed(&db, "events", vec![(k(1), Value::from("before"))]).await;
    }

    let db = open(&dir);
    seed(&db, "events", vec![(k(2), Value::from("after"))]).await;
    seed(&db, "other", vec![(k(1), Value::from("new domain"))]).await;

    let txn = db.begin();
    let history = txn.find(HISTORY_DOMAIN, Query::all()).await.unwrap();
    let domains: Vec<Value> = history
        .iter()
        .map(|(_, entry)| entry.get("domain").cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(
        domains,
        vec![Value::from("events"), Value::from("events"), Value::from("other")],
        "history keeps commit order across reopen and domain ids stay distinct"
    );
}

#[tokio::test]
async fn test_torn_log_tail_is_recovered() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        seed(&db, "users", vec![(k(1), Value::from("intact"))]).await;
    }

    let mut log = fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("objects.log"))
        .unwrap();
    log.write_all(&[0xAB; 7]).unwrap();
    drop(log);

    let db = open(&dir);
    assert_eq!(
        db.begin().get("users", &k(1)).await.unwrap(),
        Some(Value::from("intact"))
    );
    seed(&db, "users", vec![(k(2), Value::from("after recovery"))]).await;
    assert_eq!(keys(&db.begin(), "users", Query::all()).await, vec![k(1), k(2)]);
}

#[tokio::test]
async fn test_config_file_opens_database() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tessera.toml");
    let data_dir = dir.path().join("data");
    fs::write(
        &config_path,
        format!(
            "path = {:?}\ninline_string_limit = 8\n\n[durability]\nmode = \"batched\"\nbatch_size = 16\n",
            data_dir.display().to_string()
        ),
    )
    .unwrap();

    let config = DatabaseConfig::from_toml_file(&config_path).unwrap();
    assert_eq!(config.inline_string_limit, 8);
    assert_eq!(config.durability, DurabilityMode::Batched { batch_size: 16 });

    let db = Database::open(config).unwrap();
    seed(&db, "users", vec![(k(1), Value::from("configured"))]).await;
    db.flush().unwrap();
    assert_eq!(db.path(), Some(data_dir.as_path()));
    assert!(data_dir.join("objects.log").exists());
}
