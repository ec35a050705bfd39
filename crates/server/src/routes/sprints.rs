use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::sprint::{SprintRepository, UpdateSprint};
use serde_json::Value;
use services::services::sprints::{self, CommitmentChange, SprintReport};
use tracing::{info, instrument};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sprints/{ids}", get(get_sprints).patch(update_sprint))
        .route("/sprints/{ids}/commitments", post(update_commitments))
}

/// Parse a comma-separated list of sprint ids.
fn parse_ids(raw: &str) -> Result<Vec<i64>, ApiError> {
    let ids = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid sprint id '{}'", part.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(ApiError::BadRequest("No sprint ids given".to_string()));
    }
    Ok(ids)
}

fn parse_single_id(raw: &str) -> Result<i64, ApiError> {
    match parse_ids(raw)?.as_slice() {
        [id] => Ok(*id),
        _ => Err(ApiError::BadRequest(
            "Exactly one sprint id is required".to_string(),
        )),
    }
}

#[instrument(name = "sprints.report", skip(state))]
pub async fn get_sprints(
    State(state): State<AppState>,
    Path(ids): Path<String>,
) -> Result<ResponseJson<ApiResponse<SprintReport>>, ApiError> {
    let ids = parse_ids(&ids)?;
    let settings = state.settings();
    let report =
        sprints::sprint_report(state.pool(), &settings.workflow, settings.timezone, &ids).await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

/// Only `locked` may be changed. Other keys are ignored; a wrong type for
/// `locked` is rejected.
#[instrument(name = "sprints.update", skip(state, body))]
pub async fn update_sprint(
    State(state): State<AppState>,
    Path(ids): Path<String>,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let id = parse_single_id(&ids)?;
    if !body.is_object() {
        return Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }
    let update: UpdateSprint = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid sprint update: {e}")))?;

    let mut tx = state.db.begin().await?;
    let sprint = SprintRepository::update(&mut tx, id, &update).await?;
    tx.commit().await?;

    info!(sprint_id = sprint.id, locked = sprint.locked, "Updated sprint");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(name = "sprints.commitments", skip(state, changes), fields(changes = changes.len()))]
pub async fn update_commitments(
    State(state): State<AppState>,
    Path(ids): Path<String>,
    Json(changes): Json<Vec<CommitmentChange>>,
) -> Result<StatusCode, ApiError> {
    let id = parse_single_id(&ids)?;
    sprints::reconcile_commitments(&state.db, id, &changes).await?;
    Ok(StatusCode::NO_CONTENT)
}
