use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    auth_session::AuthSessionError, sprint::SprintError, user::UserError,
};
use services::services::{
    github::GitHubError, ingest::IngestError, sprints::SprintAdminError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl From<SprintAdminError> for ApiError {
    fn from(err: SprintAdminError) -> Self {
        match err {
            SprintAdminError::NotFound(_) | SprintAdminError::Sprint(SprintError::NotFound) => {
                ApiError::NotFound(err.to_string())
            }
            SprintAdminError::GitHub(e) => ApiError::GitHub(e),
            SprintAdminError::Database(e) => ApiError::Database(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SprintError> for ApiError {
    fn from(err: SprintError) -> Self {
        match err {
            SprintError::NotFound => ApiError::NotFound("Sprint not found".to_string()),
            SprintError::Database(e) => ApiError::Database(e),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::GitHub(e) => ApiError::GitHub(e),
            IngestError::Database(e) => ApiError::Database(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound => ApiError::Unauthorized("Unknown user".to_string()),
            UserError::Database(e) => ApiError::Database(e),
        }
    }
}

impl From<AuthSessionError> for ApiError {
    fn from(err: AuthSessionError) -> Self {
        match err {
            AuthSessionError::NotFound => ApiError::Unauthorized("Invalid state".to_string()),
            AuthSessionError::Database(e) => ApiError::Database(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::GitHub(e) => {
                tracing::warn!(error = %e, "GitHub request failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_not_found_maps_to_404() {
        let err: ApiError = SprintAdminError::NotFound("Sprint 9".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: ApiError = SprintAdminError::Sprint(SprintError::NotFound).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_failures_map_to_502() {
        let err: ApiError = IngestError::GitHub(GitHubError::Status {
            status: 500,
            body: String::new(),
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
