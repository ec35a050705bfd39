use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use services::services::sprints::{self, IssueHistory};
use tracing::instrument;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router() -> Router<AppState> {
    Router::new().route("/issues/{*path}", get(get_issue))
}

/// Split `{repo}/{issue_id}` where the repository may itself be `owner/name`.
fn parse_issue_path(path: &str) -> Result<(&str, i64), ApiError> {
    let (repo, issue_id) = path
        .trim_matches('/')
        .rsplit_once('/')
        .ok_or_else(|| ApiError::BadRequest("Expected /issues/{repo}/{issue_id}".to_string()))?;
    let issue_id = issue_id
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid issue id '{issue_id}'")))?;
    if repo.is_empty() {
        return Err(ApiError::BadRequest("Missing repository".to_string()));
    }
    Ok((repo, issue_id))
}

/// History of one issue across every sprint it was recorded in. A repository
/// given without an organization is resolved against the configured one.
#[instrument(name = "issues.history", skip(state))]
pub async fn get_issue(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<ResponseJson<ApiResponse<IssueHistory>>, ApiError> {
    let (repo, issue_id) = parse_issue_path(&path)?;
    let repo = state.settings().repo_path(repo);
    let history = sprints::issue_history(state.pool(), &repo, issue_id).await?;
    Ok(ResponseJson(ApiResponse::success(history)))
}
