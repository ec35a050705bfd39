//! Test utilities for database tests.
//!
//! Pools are created from a template database that has the migrations
//! applied once, so each test only pays for a file copy.

use std::{
    str::FromStr,
    sync::OnceLock,
    time::Duration,
};

use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tempfile::TempDir;
use tokio::sync::OnceCell;

use crate::models::{
    snapshot::{Snapshot, SnapshotRepository},
    sprint::{CreateSprint, Sprint, SprintRepository},
};

static TEMPLATE_DIR: OnceLock<TempDir> = OnceLock::new();
static TEMPLATE_READY: OnceCell<()> = OnceCell::const_new();

fn get_template_dir() -> &'static TempDir {
    TEMPLATE_DIR.get_or_init(|| TempDir::new().expect("Failed to create template temp dir"))
}

async fn ensure_template_ready() {
    TEMPLATE_READY
        .get_or_init(|| async {
            let template_path = get_template_dir().path().join("template.db");

            let options =
                SqliteConnectOptions::from_str(&format!("sqlite://{}", template_path.display()))
                    .expect("Invalid template database URL")
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Delete);

            let pool = SqlitePoolOptions::new()
                .min_connections(0)
                .max_connections(1)
                .connect_with(options)
                .await
                .expect("Failed to create template pool");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations on template");

            // Release the file before it gets copied.
            pool.close().await;

            tracing::debug!("Template database ready at {:?}", template_path);
        })
        .await;
}

/// Create a test database pool with migrations applied.
///
/// Returns the pool and the `TempDir` holding the database file; keep the
/// directory alive for as long as the pool is used.
pub async fn create_test_pool() -> (SqlitePool, TempDir) {
    ensure_template_ready().await;

    let temp_dir = TempDir::new().expect("Failed to create test temp dir");
    let db_path = temp_dir.path().join("test.db");
    let template_path = get_template_dir().path().join("template.db");
    std::fs::copy(&template_path, &db_path).expect("Failed to copy template database");

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
        .expect("Invalid test database URL")
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .expect("Failed to create test pool");

    (pool, temp_dir)
}

/// Insert a sprint due at `finished` and commit it.
pub async fn seed_sprint(
    pool: &SqlitePool,
    name: &str,
    finished: Option<DateTime<Utc>>,
) -> Sprint {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");
    let sprint = SprintRepository::create(
        &mut tx,
        CreateSprint {
            name: name.to_string(),
            finished,
            data: None,
        },
    )
    .await
    .expect("Failed to create sprint");
    tx.commit().await.expect("Failed to commit sprint");
    sprint
}

/// Insert an empty snapshot of `sprint_id` taken at `taken_at`.
pub async fn seed_snapshot(pool: &SqlitePool, sprint_id: i64, taken_at: DateTime<Utc>) -> Snapshot {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");
    let snapshot = SnapshotRepository::create(&mut tx, sprint_id, taken_at)
        .await
        .expect("Failed to create snapshot");
    tx.commit().await.expect("Failed to commit snapshot");
    snapshot
}
