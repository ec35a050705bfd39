//! Integration tests for the connection settings `DBService::new` applies:
//! - journal_mode = WAL
//! - foreign_keys = ON
//! - temp_store = MEMORY
//! - cache_size = -16000 (16MB)

use db::DBService;
use sqlx::{Executor, Row};
use tempfile::TempDir;

async fn setup_service() -> (DBService, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("sprints.sqlite");
    let url = format!("sqlite://{}", db_path.to_string_lossy());

    let service = DBService::new(&url).await.expect("Failed to open database");
    (service, temp_dir)
}

#[tokio::test]
async fn test_sqlite_pragma_journal_mode_wal() {
    let (service, _temp_dir) = setup_service().await;

    let row = service
        .pool
        .fetch_one(sqlx::query("PRAGMA journal_mode"))
        .await
        .expect("Failed to query journal_mode");

    let journal_mode: String = row.get(0);
    assert_eq!(journal_mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_sqlite_pragma_foreign_keys_enabled() {
    let (service, _temp_dir) = setup_service().await;

    let row = service
        .pool
        .fetch_one(sqlx::query("PRAGMA foreign_keys"))
        .await
        .expect("Failed to query foreign_keys");

    let enabled: i64 = row.get(0);
    assert_eq!(enabled, 1);

    let orphan = sqlx::query("INSERT INTO snapshots (sprint_id, timestamp) VALUES (999, '2025-01-01T00:00:00+00:00')")
        .execute(&service.pool)
        .await;
    assert!(orphan.is_err(), "snapshots must reference an existing sprint");
}

#[tokio::test]
async fn test_sqlite_pragma_temp_store_and_cache_size() {
    let (service, _temp_dir) = setup_service().await;

    let row = service
        .pool
        .fetch_one(sqlx::query("PRAGMA temp_store"))
        .await
        .expect("Failed to query temp_store");
    let temp_store: i64 = row.get(0);
    assert_eq!(temp_store, 2, "temp_store should be MEMORY (2)");

    let row = service
        .pool
        .fetch_one(sqlx::query("PRAGMA cache_size"))
        .await
        .expect("Failed to query cache_size");
    let cache_size: i64 = row.get(0);
    assert_eq!(cache_size, -16000);
}

#[tokio::test]
async fn test_reopening_applies_no_migrations_twice() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!(
        "sqlite://{}",
        temp_dir.path().join("sprints.sqlite").to_string_lossy()
    );

    let first = DBService::new(&url).await.expect("first open");
    first.pool.close().await;

    let second = DBService::new(&url).await.expect("second open");
    let (tables,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sprints'",
    )
    .fetch_one(&second.pool)
    .await
    .expect("Failed to inspect schema");
    assert_eq!(tables, 1);
}

#[tokio::test]
async fn test_in_memory_database_has_schema() {
    let service = DBService::in_memory().await.expect("in-memory database");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sprint_commitments")
        .fetch_one(&service.pool)
        .await
        .expect("Failed to query sprint_commitments");
    assert_eq!(count, 0);
}
