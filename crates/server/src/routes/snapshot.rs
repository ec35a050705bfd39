use axum::{Router, extract::State, response::Json as ResponseJson, routing::post};
use services::services::ingest::IngestReport;
use tracing::instrument;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Run one ingestion pass and report what was recorded.
#[instrument(name = "snapshot.trigger", skip(state))]
pub async fn trigger_snapshot(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<IngestReport>>, ApiError> {
    if !state.github.has_token() {
        return Err(ApiError::Internal(
            "GITHUB_TOKEN is not configured".to_string(),
        ));
    }
    let report = state.ingester().run().await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/snapshot", post(trigger_snapshot))
}
