//! Build status badges.

use axum::Router;
use axum::extract::{Path, State};
use axum::response::Redirect;
use axum::routing::get;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/badges/{owner}/{repo}/{ref}", get(badge))
}

/// 307 redirect to the badge asset for the ref's latest build status.
/// A ref with no builds gets the `success` badge.
async fn badge(
    State(state): State<AppState>,
    Path((owner, repo, gh_ref)): Path<(String, String, String)>,
) -> Result<Redirect, ApiError> {
    let project = state
        .projects
        .get_by_owner_and_name(&owner, &repo)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {owner}/{repo}")))?;

    let status = state
        .builds
        .latest_for_ref(project.id, &gh_ref)
        .await?
        .map(|build| build.status)
        .unwrap_or_else(|| "success".to_string());

    Ok(Redirect::temporary(&format!(
        "/static/img/badges/{status}.png"
    )))
}
