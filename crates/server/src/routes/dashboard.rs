use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use services::services::sprints::{self, SprintSummary};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Every snapshotted sprint with its latest totals and completion.
pub async fn get_dashboard(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<SprintSummary>>>, ApiError> {
    let summaries = sprints::dashboard(state.pool(), &state.settings().workflow).await?;
    Ok(ResponseJson(ApiResponse::success(summaries)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_dashboard))
}
