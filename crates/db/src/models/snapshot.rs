use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, QueryBuilder, Sqlite};
use thiserror::Error;

use crate::Tx;

/// The tracker state of one sprint as observed by a single poll.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Snapshot {
    pub id: i64,
    pub sprint_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct SnapshotRepository;

impl SnapshotRepository {
    pub async fn create(
        tx: &mut Tx<'_>,
        sprint_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            INSERT INTO snapshots (sprint_id, timestamp)
            VALUES ($1, $2)
            RETURNING id, sprint_id, timestamp
            "#,
        )
        .bind(sprint_id)
        .bind(timestamp)
        .fetch_one(&mut **tx)
        .await?;
        Ok(snapshot)
    }

    pub async fn most_recent_for_sprint<'e, E>(
        executor: E,
        sprint_id: i64,
    ) -> Result<Option<Snapshot>, SnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT id, sprint_id, timestamp
            FROM snapshots
            WHERE sprint_id = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(sprint_id)
        .fetch_optional(executor)
        .await?;
        Ok(snapshot)
    }

    /// Every snapshot of the given sprints, oldest first.
    pub async fn list_for_sprints<'e, E>(
        executor: E,
        sprint_ids: &[i64],
    ) -> Result<Vec<Snapshot>, SnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if sprint_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, sprint_id, timestamp FROM snapshots WHERE sprint_id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for id in sprint_ids {
                separated.push_bind(id);
            }
        }
        builder.push(") ORDER BY timestamp ASC, id ASC");

        let snapshots = builder
            .build_query_as::<Snapshot>()
            .fetch_all(executor)
            .await?;
        Ok(snapshots)
    }

    pub async fn count<'e, E>(executor: E) -> Result<i64, SnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM snapshots")
            .fetch_one(executor)
            .await?;
        Ok(count)
    }
}
