//! Sprints are keyed by the milestone title they were created from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Executor, QueryBuilder, Sqlite};
use thiserror::Error;

use crate::Tx;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sprint {
    pub id: i64,
    pub name: String,
    /// Milestone due date.
    pub finished: Option<DateTime<Utc>>,
    /// Raw milestone payload as returned by the tracker.
    pub data: Option<Value>,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSprint {
    pub name: String,
    pub finished: Option<DateTime<Utc>>,
    pub data: Option<Value>,
}

/// Fields a client may change on a sprint. Anything else in a PATCH body is
/// dropped during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSprint {
    #[serde(default)]
    pub locked: Option<bool>,
}

#[derive(Debug, Error)]
pub enum SprintError {
    #[error("sprint not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

const SPRINT_COLUMNS: &str = "id, name, finished, data, locked, created_at";

pub struct SprintRepository;

impl SprintRepository {
    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sprint = sqlx::query_as::<_, Sprint>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(sprint)
    }

    /// Load every sprint in `ids`, preserving the requested order.
    /// Fails with `NotFound` if any id is unknown.
    pub async fn find_many<'e, E>(executor: E, ids: &[i64]) -> Result<Vec<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE id IN ("));
        {
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
        }
        builder.push(")");

        let found = builder.build_query_as::<Sprint>().fetch_all(executor).await?;

        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            let sprint = found
                .iter()
                .find(|s| s.id == *id)
                .ok_or(SprintError::NotFound)?;
            if !ordered.iter().any(|s: &Sprint| s.id == *id) {
                ordered.push(sprint.clone());
            }
        }
        Ok(ordered)
    }

    pub async fn find_by_name<'e, E>(executor: E, name: &str) -> Result<Option<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sprint = sqlx::query_as::<_, Sprint>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(executor)
        .await?;
        Ok(sprint)
    }

    /// All sprints, earliest due date first.
    pub async fn list_by_finished<'e, E>(executor: E) -> Result<Vec<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sprints = sqlx::query_as::<_, Sprint>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints ORDER BY finished ASC, id ASC"
        ))
        .fetch_all(executor)
        .await?;
        Ok(sprints)
    }

    pub async fn list_by_name<'e, E>(executor: E) -> Result<Vec<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sprints = sqlx::query_as::<_, Sprint>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints ORDER BY name ASC"
        ))
        .fetch_all(executor)
        .await?;
        Ok(sprints)
    }

    /// Sprints whose due date falls in `(now - 1 day, now + 6 days)`.
    pub async fn find_current<'e, E>(
        executor: E,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sprint>, SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let yesterday = now - Duration::days(1);
        let six_days_from_now = yesterday + Duration::days(7);

        let sprints = sqlx::query_as::<_, Sprint>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints
             WHERE finished > $1 AND finished < $2
             ORDER BY finished ASC"
        ))
        .bind(yesterday)
        .bind(six_days_from_now)
        .fetch_all(executor)
        .await?;
        Ok(sprints)
    }

    pub async fn create(tx: &mut Tx<'_>, data: CreateSprint) -> Result<Sprint, SprintError> {
        let sprint = sqlx::query_as::<_, Sprint>(&format!(
            "INSERT INTO sprints (name, finished, data, locked, created_at)
             VALUES ($1, $2, $3, 0, $4)
             RETURNING {SPRINT_COLUMNS}"
        ))
        .bind(&data.name)
        .bind(data.finished)
        .bind(data.data)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;
        Ok(sprint)
    }

    /// Look the sprint up by name, creating it from `data` when absent.
    pub async fn get_or_create(tx: &mut Tx<'_>, data: CreateSprint) -> Result<Sprint, SprintError> {
        if let Some(existing) = Self::find_by_name(&mut **tx, &data.name).await? {
            return Ok(existing);
        }
        Self::create(tx, data).await
    }

    pub async fn set_locked<'e, E>(executor: E, id: i64, locked: bool) -> Result<(), SprintError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE sprints SET locked = $2 WHERE id = $1")
            .bind(id)
            .bind(locked)
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SprintError::NotFound);
        }
        Ok(())
    }

    /// Apply the allow-listed fields of `data`. Returns the updated sprint.
    pub async fn update(
        tx: &mut Tx<'_>,
        id: i64,
        data: &UpdateSprint,
    ) -> Result<Sprint, SprintError> {
        if let Some(locked) = data.locked {
            Self::set_locked(&mut **tx, id, locked).await?;
        }
        Self::find_by_id(&mut **tx, id)
            .await?
            .ok_or(SprintError::NotFound)
    }
}
