use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, QueryBuilder, Sqlite};
use thiserror::Error;

use crate::Tx;

/// An issue the team committed to finishing within a sprint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SprintCommitment {
    pub id: i64,
    pub sprint_id: i64,
    pub issue_id: i64,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SprintCommitmentError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct SprintCommitmentRepository;

impl SprintCommitmentRepository {
    pub async fn list_for_sprint<'e, E>(
        executor: E,
        sprint_id: i64,
    ) -> Result<Vec<SprintCommitment>, SprintCommitmentError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, SprintCommitment>(
            r#"
            SELECT id, sprint_id, issue_id, created
            FROM sprint_commitments
            WHERE sprint_id = $1
            ORDER BY issue_id ASC
            "#,
        )
        .bind(sprint_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Committed issue ids keyed by sprint. Sprints without commitments get an
    /// empty set so callers can index by every requested id.
    pub async fn issue_ids_by_sprint<'e, E>(
        executor: E,
        sprint_ids: &[i64],
    ) -> Result<HashMap<i64, HashSet<i64>>, SprintCommitmentError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let mut by_sprint: HashMap<i64, HashSet<i64>> = sprint_ids
            .iter()
            .map(|id| (*id, HashSet::new()))
            .collect();
        if sprint_ids.is_empty() {
            return Ok(by_sprint);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, sprint_id, issue_id, created FROM sprint_commitments WHERE sprint_id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for id in sprint_ids {
                separated.push_bind(id);
            }
        }
        builder.push(")");

        let rows = builder
            .build_query_as::<SprintCommitment>()
            .fetch_all(executor)
            .await?;
        for row in rows {
            by_sprint.entry(row.sprint_id).or_default().insert(row.issue_id);
        }
        Ok(by_sprint)
    }

    /// Record a commitment. Committing an already committed issue is a no-op.
    pub async fn insert(
        tx: &mut Tx<'_>,
        sprint_id: i64,
        issue_id: i64,
    ) -> Result<(), SprintCommitmentError> {
        sqlx::query(
            r#"
            INSERT INTO sprint_commitments (sprint_id, issue_id, created)
            VALUES ($1, $2, $3)
            ON CONFLICT (sprint_id, issue_id) DO NOTHING
            "#,
        )
        .bind(sprint_id)
        .bind(issue_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Remove a commitment. Returns whether a row was deleted.
    pub async fn delete(
        tx: &mut Tx<'_>,
        sprint_id: i64,
        issue_id: i64,
    ) -> Result<bool, SprintCommitmentError> {
        let result =
            sqlx::query("DELETE FROM sprint_commitments WHERE sprint_id = $1 AND issue_id = $2")
                .bind(sprint_id)
                .bind(issue_id)
                .execute(&mut **tx)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
