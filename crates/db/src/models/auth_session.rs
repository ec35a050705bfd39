use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Sqlite};
use thiserror::Error;
use uuid::Uuid;

/// Sessions unused for longer than this are revoked on their next request.
pub const MAX_SESSION_INACTIVITY_DURATION: Duration = Duration::days(30);

/// How long a login may stay between `/login` and the provider's callback.
pub const PENDING_SESSION_TTL: Duration = Duration::minutes(15);

/// A browser session. It starts out pending, holding the OAuth `state` it
/// sent to the provider, and becomes authorized once a user is attached.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthSession {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub oauth_state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn inactivity_duration(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_used_at)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[derive(Debug, Error)]
pub enum AuthSessionError {
    #[error("auth session not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

const AUTH_SESSION_COLUMNS: &str =
    "id, user_id, oauth_state, created_at, last_used_at, revoked_at";

pub struct AuthSessionRepository;

impl AuthSessionRepository {
    pub async fn create<'e, E>(
        executor: E,
        oauth_state: &str,
    ) -> Result<AuthSession, AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let session = sqlx::query_as::<_, AuthSession>(&format!(
            "INSERT INTO auth_sessions (id, user_id, oauth_state, created_at, last_used_at)
             VALUES ($1, NULL, $2, $3, $3)
             RETURNING {AUTH_SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(oauth_state)
        .bind(now)
        .fetch_one(executor)
        .await?;
        Ok(session)
    }

    pub async fn get<'e, E>(executor: E, id: Uuid) -> Result<AuthSession, AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AuthSession>(&format!(
            "SELECT {AUTH_SESSION_COLUMNS} FROM auth_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AuthSessionError::NotFound)
    }

    /// Bind the session to `user_id` and forget the consumed OAuth state.
    pub async fn attach_user<'e, E>(
        executor: E,
        id: Uuid,
        user_id: i64,
    ) -> Result<(), AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET user_id = $2, oauth_state = NULL, last_used_at = $3
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthSessionError::NotFound);
        }
        Ok(())
    }

    pub async fn touch<'e, E>(executor: E, id: Uuid) -> Result<(), AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE auth_sessions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn revoke<'e, E>(executor: E, id: Uuid) -> Result<(), AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE auth_sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Delete revoked sessions, sessions idle past the inactivity limit and
    /// logins abandoned before the callback. Returns how many were removed.
    pub async fn purge_stale<'e, E>(executor: E, now: DateTime<Utc>) -> Result<u64, AuthSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            DELETE FROM auth_sessions
            WHERE revoked_at IS NOT NULL
               OR last_used_at < $1
               OR (user_id IS NULL AND created_at < $2)
            "#,
        )
        .bind(now - MAX_SESSION_INACTIVITY_DURATION)
        .bind(now - PENDING_SESSION_TTL)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
