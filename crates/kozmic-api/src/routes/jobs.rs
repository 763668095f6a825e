//! Job operations.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::Json;
use serde_json::json;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/jobs/{id}/restart", post(restart))
}

/// Delete a finished job and re-run it synchronously. Answers 409 while
/// the job is still running.
async fn restart(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.runner.restart(id).await?;
    Ok(Json(json!({
        "job_id": job.id,
        "task_uuid": job.task_uuid,
        "return_code": job.return_code,
    })))
}
