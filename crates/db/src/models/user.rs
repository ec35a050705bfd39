use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<User>, UserError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, access_token, active, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(user)
    }

    pub async fn find_by_username<'e, E>(
        executor: E,
        username: &str,
    ) -> Result<Option<User>, UserError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, access_token, active, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(executor)
        .await?;
        Ok(user)
    }

    /// Create the user on first login, or store the fresh token on later ones.
    pub async fn upsert<'e, E>(
        executor: E,
        username: &str,
        access_token: &str,
    ) -> Result<User, UserError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, access_token, active, created_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (username) DO UPDATE SET access_token = excluded.access_token
            RETURNING id, username, access_token, active, created_at
            "#,
        )
        .bind(username)
        .bind(access_token)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;
        Ok(user)
    }
}
