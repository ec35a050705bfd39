use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Executor, QueryBuilder, Sqlite};
use thiserror::Error;

use crate::Tx;

/// One issue as recorded by one snapshot. Rows are never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueSnapshot {
    pub id: i64,
    pub snapshot_id: i64,
    pub repo: String,
    pub issue_id: i64,
    pub points: i64,
    pub state: i64,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl IssueSnapshot {
    pub fn title(&self) -> Option<&str> {
        self.data.get("title").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CreateIssueSnapshot {
    pub snapshot_id: i64,
    pub repo: String,
    pub issue_id: i64,
    pub points: i64,
    pub state: i64,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// An issue snapshot together with where and when it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueHistoryEntry {
    pub snapshot_id: i64,
    pub taken_at: DateTime<Utc>,
    pub sprint_id: Option<i64>,
    pub sprint_name: Option<String>,
    pub points: i64,
    pub state: i64,
    pub updated_at: DateTime<Utc>,
}

/// The columns aggregation needs, without the raw payload.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IssuePointsRow {
    pub snapshot_id: i64,
    pub issue_id: i64,
    pub points: i64,
    pub state: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StatePoints {
    pub state: i64,
    pub points: i64,
}

#[derive(Debug, Error)]
pub enum IssueSnapshotError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

const ISSUE_SNAPSHOT_COLUMNS: &str =
    "id, snapshot_id, repo, issue_id, points, state, data, updated_at";

pub struct IssueSnapshotRepository;

impl IssueSnapshotRepository {
    pub async fn insert(
        tx: &mut Tx<'_>,
        data: &CreateIssueSnapshot,
    ) -> Result<IssueSnapshot, IssueSnapshotError> {
        let row = sqlx::query_as::<_, IssueSnapshot>(&format!(
            "INSERT INTO issue_snapshots (snapshot_id, repo, issue_id, points, state, data, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ISSUE_SNAPSHOT_COLUMNS}"
        ))
        .bind(data.snapshot_id)
        .bind(&data.repo)
        .bind(data.issue_id)
        .bind(data.points)
        .bind(data.state)
        .bind(&data.data)
        .bind(data.updated_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn list_for_snapshot<'e, E>(
        executor: E,
        snapshot_id: i64,
    ) -> Result<Vec<IssueSnapshot>, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, IssueSnapshot>(&format!(
            "SELECT {ISSUE_SNAPSHOT_COLUMNS} FROM issue_snapshots
             WHERE snapshot_id = $1
             ORDER BY state ASC, issue_id ASC"
        ))
        .bind(snapshot_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Point rows for many snapshots at once, for burndown aggregation.
    pub async fn points_for_snapshots<'e, E>(
        executor: E,
        snapshot_ids: &[i64],
    ) -> Result<Vec<IssuePointsRow>, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if snapshot_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT snapshot_id, issue_id, points, state FROM issue_snapshots WHERE snapshot_id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for id in snapshot_ids {
                separated.push_bind(id);
            }
        }
        builder.push(") ORDER BY snapshot_id ASC, issue_id ASC");

        let rows = builder
            .build_query_as::<IssuePointsRow>()
            .fetch_all(executor)
            .await?;
        Ok(rows)
    }

    /// The most recently updated record of an issue, across all snapshots.
    pub async fn latest_for_issue<'e, E>(
        executor: E,
        repo: &str,
        issue_id: i64,
    ) -> Result<Option<IssueSnapshot>, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, IssueSnapshot>(&format!(
            "SELECT {ISSUE_SNAPSHOT_COLUMNS} FROM issue_snapshots
             WHERE repo = $1 AND issue_id = $2
             ORDER BY updated_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(repo)
        .bind(issue_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Every record of an issue with its snapshot time and sprint, oldest first.
    pub async fn history<'e, E>(
        executor: E,
        repo: &str,
        issue_id: i64,
    ) -> Result<Vec<IssueHistoryEntry>, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, IssueHistoryEntry>(
            r#"
            SELECT
                i.snapshot_id AS snapshot_id,
                s.timestamp   AS taken_at,
                s.sprint_id   AS sprint_id,
                sp.name       AS sprint_name,
                i.points      AS points,
                i.state       AS state,
                i.updated_at  AS updated_at
            FROM issue_snapshots i
            JOIN snapshots s ON s.id = i.snapshot_id
            LEFT JOIN sprints sp ON sp.id = s.sprint_id
            WHERE i.repo = $1 AND i.issue_id = $2
            ORDER BY s.timestamp ASC, i.id ASC
            "#,
        )
        .bind(repo)
        .bind(issue_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Number of distinct sprints the issue has been recorded in.
    pub async fn sprint_count<'e, E>(
        executor: E,
        repo: &str,
        issue_id: i64,
    ) -> Result<i64, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(DISTINCT s.sprint_id)
            FROM issue_snapshots i
            JOIN snapshots s ON s.id = i.snapshot_id
            WHERE i.repo = $1 AND i.issue_id = $2
            "#,
        )
        .bind(repo)
        .bind(issue_id)
        .fetch_one(executor)
        .await?;
        Ok(count)
    }

    /// Point sums of one snapshot grouped by workflow state.
    pub async fn state_totals<'e, E>(
        executor: E,
        snapshot_id: i64,
    ) -> Result<Vec<StatePoints>, IssueSnapshotError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, StatePoints>(
            r#"
            SELECT state, COALESCE(SUM(points), 0) AS points
            FROM issue_snapshots
            WHERE snapshot_id = $1
            GROUP BY state
            ORDER BY state ASC
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }
}
