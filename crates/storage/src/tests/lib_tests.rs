use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let store = SqliteKvStore::new("sqlite::memory:").await.expect("db");
    store.health_check().await.expect("health check");
}

#[tokio::test]
async fn missing_key_reads_as_none() {
    let store = SqliteKvStore::new("sqlite::memory:").await.expect("db");
    assert_eq!(store.get("CONTRACT_ADDRESSES").await.expect("get"), None);
}

#[tokio::test]
async fn set_overwrites_previous_value() {
    let store = SqliteKvStore::new("sqlite::memory:").await.expect("db");
    store.set("k", "first").await.expect("first");
    store.set("k", "second").await.expect("second");

    let entry = store.entry("k").await.expect("entry").expect("present");
    assert_eq!(entry.key, "k");
    assert_eq!(entry.value, "second");
    assert!(entry.updated_at <= Utc::now());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("kv.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqliteKvStore::new(&database_url).await.expect("db");
    drop(store);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn values_survive_reopening_the_database() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("kv.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqliteKvStore::new(&database_url).await.expect("db");
    store.set("k", r#"{"a":1}"#).await.expect("set");
    store.pool().close().await;

    let reopened = SqliteKvStore::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.get("k").await.expect("get").as_deref(),
        Some(r#"{"a":1}"#)
    );
}

#[tokio::test]
async fn memory_store_round_trips_and_shares_clones() {
    let store = MemoryKvStore::new();
    assert!(store.is_empty().await);

    let clone = store.clone();
    clone.set("k", "v").await.expect("set");

    assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v"));
    assert_eq!(store.len().await, 1);
}

#[test]
fn sqlite_path_ignores_memory_and_query_suffix() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/kv.db?mode=rwc"),
        Some(PathBuf::from("./data/kv.db"))
    );
}
