use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueLabel {
    pub id: i64,
    pub repo: String,
    pub name: String,
    /// Hex color without the leading `#`, as the tracker reports it.
    pub color: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct UpsertIssueLabel {
    pub repo: String,
    pub name: String,
    pub color: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum IssueLabelError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct IssueLabelRepository;

impl IssueLabelRepository {
    pub async fn upsert<'e, E>(
        executor: E,
        data: &UpsertIssueLabel,
    ) -> Result<IssueLabel, IssueLabelError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let label = sqlx::query_as::<_, IssueLabel>(
            r#"
            INSERT INTO issue_labels (repo, name, color, url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (repo, name) DO UPDATE
                SET color = excluded.color, url = excluded.url
            RETURNING id, repo, name, color, url
            "#,
        )
        .bind(&data.repo)
        .bind(&data.name)
        .bind(&data.color)
        .bind(&data.url)
        .fetch_one(executor)
        .await?;
        Ok(label)
    }

    pub async fn list_for_repo<'e, E>(
        executor: E,
        repo: &str,
    ) -> Result<Vec<IssueLabel>, IssueLabelError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let labels = sqlx::query_as::<_, IssueLabel>(
            "SELECT id, repo, name, color, url FROM issue_labels WHERE repo = $1 ORDER BY name ASC",
        )
        .bind(repo)
        .fetch_all(executor)
        .await?;
        Ok(labels)
    }
}
