//! HTTP routes.

pub mod badges;
pub mod hooks;
pub mod jobs;

use axum::Router;
use axum::routing::get;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(hooks::router())
        .merge(badges::router())
        .merge(jobs::router())
        .route("/{channel}/", get(crate::ws::ws_handler))
        .with_state(state)
}
